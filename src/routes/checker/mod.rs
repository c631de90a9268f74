mod handler;
mod model;

pub use handler::{results, search, status};
pub use model::{ResultsQuery, SearchRequest, SearchResponse, StatusQuery};
