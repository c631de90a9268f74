use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use super::{FetchError, FetchHints, Fetcher, HostLimits, RawContent};
use crate::models::FetchTarget;

/// 重试策略：第 n 次重试前等待 min(base * 2^n, max)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 单次尝试的超时，包括排队等待并发名额之后的整个请求
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// 给任意 [`Fetcher`] 加上重试和并发限制
pub struct ResilientFetcher {
    inner: Arc<dyn Fetcher>,
    policy: RetryPolicy,
    limits: Arc<HostLimits>,
}

impl ResilientFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, policy: RetryPolicy, limits: Arc<HostLimits>) -> Self {
        Self {
            inner,
            policy,
            limits,
        }
    }

    async fn attempt(&self, target: &FetchTarget, hints: FetchHints) -> Result<RawContent, FetchError> {
        // 退避期间不占用并发名额
        let _permit = self.limits.acquire(target.host()).await?;
        match timeout(self.policy.attempt_timeout, self.inner.fetch(target, hints)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: target.canonical(),
            }),
        }
    }
}

#[async_trait]
impl Fetcher for ResilientFetcher {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn fetch(&self, target: &FetchTarget, hints: FetchHints) -> Result<RawContent, FetchError> {
        let mut retry = 0;
        loop {
            let err = match self.attempt(target, hints).await {
                Ok(content) => {
                    if retry > 0 {
                        info!("第{}次重试成功 {}", retry, target);
                    }
                    return Ok(content);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(err);
            }
            if retry >= self.policy.max_retries {
                if retry == 0 {
                    return Err(err);
                }
                return Err(FetchError::RetriesExhausted {
                    url: target.canonical(),
                    attempts: retry + 1,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.backoff(retry);
            warn!(
                "[{}] 抓取失败，{}ms 后重试 ({}/{}) {}: {}",
                self.inner.name(),
                delay.as_millis(),
                retry + 1,
                self.policy.max_retries,
                target,
                err
            );
            sleep(delay).await;
            retry += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// 按顺序返回预设结果，用完后一直返回最后一个
    struct Scripted {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<RawContent, FetchError>>>,
        last: Result<RawContent, FetchError>,
        delay: Duration,
    }

    impl Scripted {
        fn new(script: Vec<Result<RawContent, FetchError>>) -> Arc<Self> {
            let last = script.last().cloned().unwrap();
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
                last,
                delay: Duration::ZERO,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self, _target: &FetchTarget, _hints: FetchHints) -> Result<RawContent, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.last.clone())
        }
    }

    fn ok() -> Result<RawContent, FetchError> {
        Ok(RawContent {
            url: "http://a.com/".into(),
            status: 200,
            content_type: None,
            body: "<p></p>".into(),
        })
    }

    fn status(code: u16) -> Result<RawContent, FetchError> {
        Err(FetchError::Status {
            url: "http://a.com/".into(),
            status: code,
        })
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn resilient(inner: Arc<Scripted>, policy: RetryPolicy) -> ResilientFetcher {
        ResilientFetcher::new(inner, policy, Arc::new(HostLimits::new(4, 2)))
    }

    fn target() -> FetchTarget {
        FetchTarget::parse("http://a.com/").unwrap()
    }

    #[tokio::test]
    async fn test_transient_errors_retry_up_to_max() {
        let inner = Scripted::new(vec![status(503)]);
        let fetcher = resilient(inner.clone(), policy(3));
        let err = fetcher
            .fetch(&target(), FetchHints::default())
            .await
            .unwrap_err();
        assert_eq!(inner.calls(), 4);
        assert!(matches!(err, FetchError::RetriesExhausted { attempts: 4, .. }));
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let inner = Scripted::new(vec![status(404)]);
        let fetcher = resilient(inner.clone(), policy(3));
        let err = fetcher
            .fetch(&target(), FetchHints::default())
            .await
            .unwrap_err();
        assert_eq!(inner.calls(), 1);
        assert_eq!(err, status(404).unwrap_err());
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let inner = Scripted::new(vec![status(502), status(500), ok()]);
        let fetcher = resilient(inner.clone(), policy(3));
        let page = fetcher.fetch(&target(), FetchHints::default()).await.unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_returns_first_error() {
        let inner = Scripted::new(vec![status(503)]);
        let fetcher = resilient(inner.clone(), policy(0));
        let err = fetcher
            .fetch(&target(), FetchHints::default())
            .await
            .unwrap_err();
        assert_eq!(inner.calls(), 1);
        assert_eq!(err, status(503).unwrap_err());
    }

    #[tokio::test]
    async fn test_slow_attempts_time_out_and_retry() {
        let inner = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            last: ok(),
            delay: Duration::from_millis(200),
        });
        let fetcher = resilient(
            inner.clone(),
            RetryPolicy {
                attempt_timeout: Duration::from_millis(20),
                ..policy(2)
            },
        );
        let err = fetcher
            .fetch(&target(), FetchHints::default())
            .await
            .unwrap_err();
        assert_eq!(inner.calls(), 3);
        assert!(err.is_timeout());
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(2), Duration::from_millis(800));
        assert_eq!(policy.backoff(3), Duration::from_secs(1));
        assert_eq!(policy.backoff(40), Duration::from_secs(1));
    }
}
