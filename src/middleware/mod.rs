mod client_key;
mod error_handler;
mod rate_limit;

pub use client_key::{API_KEY_HEADER, ClientKey, client_key};
pub use error_handler::log_errors;
pub use rate_limit::{QuotaDecision, RateLimiter};
