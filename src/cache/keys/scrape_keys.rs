/// 抓取结果缓存键前缀
const SCRAPE_RESULT_PREFIX: &str = "scrape:result:";

/// 生成抓取结果缓存键，参数是 FetchTarget 的指纹
pub fn scrape_result_key(fingerprint: &str) -> String {
    format!("{}{}", SCRAPE_RESULT_PREFIX, fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrape_result_key() {
        assert_eq!(scrape_result_key("abc"), "scrape:result:abc");
    }
}
