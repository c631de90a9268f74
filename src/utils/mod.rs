use axum::Json;
use serde::Serialize;

use crate::result::ApiResponse;

pub mod clock;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};

// 所有 handler 统一返回 Json<ApiResponse<T>>
pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: error_codes::SUCCESS,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

/// 折叠空白字符，去掉首尾空格
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const RATE_LIMIT: i32 = 1005;
    pub const UNSUPPORTED_SITE: i32 = 1006;
    pub const UPSTREAM_ERROR: i32 = 2000;
    pub const UPSTREAM_TIMEOUT: i32 = 2001;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const STORE_UNAVAILABLE: i32 = 5001;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b  c "), "a b c");
        assert_eq!(collapse_whitespace("   "), "");
    }
}
