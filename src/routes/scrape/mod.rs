mod handler;
mod model;

pub use handler::{invalidate, scrape};
pub use model::{InvalidateResponse, ScrapeQuery, ScrapeResponse};
