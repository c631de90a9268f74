/// 令牌桶配额键前缀
const QUOTA_PREFIX: &str = "quota:";

/// 生成客户端配额键，客户端标识形如 `ip:1.2.3.4` 或 `key:xxx`
pub fn quota_key(client_key: &str) -> String {
    format!("{}{}", QUOTA_PREFIX, client_key)
}
