use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::FetchError;

/// 全局和按主机的并发上限
///
/// 先拿主机许可再拿全局许可，同一主机排队的请求不会占住全局名额。
pub struct HostLimits {
    global: Arc<Semaphore>,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    per_host_limit: usize,
}

/// 持有期间占用一个全局名额和一个主机名额
pub struct HostPermit {
    _host: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl HostLimits {
    pub fn new(global_limit: usize, per_host_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit.max(1))),
            per_host: Mutex::new(HashMap::new()),
            per_host_limit: per_host_limit.max(1),
        }
    }

    fn host_semaphore(&self, host: &str) -> Result<Arc<Semaphore>, FetchError> {
        let mut per_host = self.per_host.lock().map_err(|_| closed(host))?;
        Ok(per_host
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone())
    }

    pub async fn acquire(&self, host: &str) -> Result<HostPermit, FetchError> {
        let host_permit = self
            .host_semaphore(host)?
            .acquire_owned()
            .await
            .map_err(|_| closed(host))?;
        let global_permit = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| closed(host))?;
        Ok(HostPermit {
            _host: host_permit,
            _global: global_permit,
        })
    }

    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }
}

fn closed(host: &str) -> FetchError {
    FetchError::Connect {
        url: host.to_string(),
        message: "并发限制已关闭".into(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::future::join_all;

    use super::*;

    async fn run(limits: Arc<HostLimits>, hosts: Vec<&'static str>) -> usize {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks = hosts.into_iter().map(|host| {
            let limits = limits.clone();
            let active = active.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                let _permit = limits.acquire(host).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
        });
        join_all(tasks).await;
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_per_host_ceiling() {
        let limits = Arc::new(HostLimits::new(8, 2));
        let peak = run(limits.clone(), vec!["a.com"; 6]).await;
        assert_eq!(peak, 2);
        assert_eq!(limits.available_global(), 8);
    }

    #[tokio::test]
    async fn test_global_ceiling() {
        let limits = Arc::new(HostLimits::new(3, 2));
        let peak = run(limits, vec!["a.com", "b.com", "c.com", "d.com", "a.com", "b.com"]).await;
        assert!(peak <= 3);
    }
}
