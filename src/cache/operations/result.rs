use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use crate::cache::models::CacheEntry;
use crate::cache::store::SharedStore;
use crate::error::AppError;
use crate::utils::SharedClock;

/// 加载函数的产出
pub struct Fill<V> {
    pub value: V,
    /// 为 false 时结果只返回给本轮等待者，不写缓存
    pub cacheable: bool,
}

impl<V> Fill<V> {
    pub fn cacheable(value: V) -> Self {
        Self {
            value,
            cacheable: true,
        }
    }

    pub fn transient(value: V) -> Self {
        Self {
            value,
            cacheable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupSource {
    /// 命中缓存
    Hit,
    /// 本请求触发了加载
    Fetched,
    /// 等待了其他请求正在进行的加载
    Joined,
}

#[derive(Debug, Clone)]
pub struct Lookup<V> {
    pub entry: CacheEntry<V>,
    pub source: LookupSource,
}

type SharedLoad<V> = Shared<BoxFuture<'static, Result<CacheEntry<V>, AppError>>>;

struct Inflight<V> {
    id: u64,
    waiters: usize,
    future: SharedLoad<V>,
}

type InflightMap<V> = Arc<Mutex<HashMap<String, Inflight<V>>>>;

/// 抓取结果缓存
///
/// 同一个键缺失时只有一个加载在跑，其余请求等待它的结果。
/// 所有等待者都取消时加载本身也会被丢弃，登记表随之清理。
pub struct ResultCache<V> {
    store: Arc<dyn SharedStore>,
    clock: SharedClock,
    ttl: Duration,
    inflight: InflightMap<V>,
    next_id: AtomicU64,
}

impl<V> ResultCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn SharedStore>, clock: SharedClock, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 读取未过期的条目；存储故障或数据损坏都按未命中处理
    pub async fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("读取缓存失败 {}: {}", key, e);
                return None;
            }
        };

        let entry: CacheEntry<V> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("缓存数据无法解析 {}: {}", key, e);
                return None;
            }
        };

        // 存储端的过期可能滞后，这里再按条目自身的时间判断一次
        entry.is_fresh(self.clock.now_ms()).then_some(entry)
    }

    pub async fn put(&self, key: &str, value: V) -> Result<CacheEntry<V>, AppError> {
        let entry = CacheEntry::new(key, value, self.clock.now_ms(), ttl_ms(self.ttl));
        write_entry(self.store.as_ref(), &entry, self.ttl).await?;
        Ok(entry)
    }

    pub async fn invalidate(&self, key: &str) -> Result<(), AppError> {
        self.store.delete(key).await?;
        Ok(())
    }

    /// 正在进行中的加载数量
    pub fn inflight_len(&self) -> usize {
        self.inflight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// 读缓存，未命中时加载并写回
    ///
    /// 加载失败不会写缓存，错误原样返回给所有等待者。
    pub async fn get_or_load<F, Fut>(&self, key: &str, load: F) -> Result<Lookup<V>, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fill<V>, AppError>> + Send + 'static,
    {
        if let Some(entry) = self.get(key).await {
            debug!("缓存命中 {}", key);
            return Ok(Lookup {
                entry,
                source: LookupSource::Hit,
            });
        }

        let (id, future, source) = {
            let mut inflight = self
                .inflight
                .lock()
                .map_err(|_| AppError::Internal("去重表锁已损坏".into()))?;

            match inflight.get_mut(key) {
                Some(slot) => {
                    slot.waiters += 1;
                    (slot.id, slot.future.clone(), LookupSource::Joined)
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = self.spawn_load(key, load());
                    inflight.insert(
                        key.to_string(),
                        Inflight {
                            id,
                            waiters: 1,
                            future: future.clone(),
                        },
                    );
                    (id, future, LookupSource::Fetched)
                }
            }
        };

        let _guard = InflightGuard {
            inflight: self.inflight.clone(),
            key: key.to_string(),
            id,
        };

        if source == LookupSource::Joined {
            debug!("等待进行中的加载 {}", key);
        }
        let entry = future.await?;
        Ok(Lookup { entry, source })
    }

    fn spawn_load<Fut>(&self, key: &str, load: Fut) -> SharedLoad<V>
    where
        Fut: Future<Output = Result<Fill<V>, AppError>> + Send + 'static,
    {
        let store = self.store.clone();
        let clock = self.clock.clone();
        let ttl = self.ttl;
        let key = key.to_string();

        async move {
            let fill = load.await?;
            let now = clock.now_ms();
            if !fill.cacheable {
                info!("结果不写缓存 {}", key);
                return Ok(CacheEntry::new(key, fill.value, now, 0));
            }

            let entry = CacheEntry::new(key, fill.value, now, ttl_ms(ttl));
            if let Err(e) = write_entry(store.as_ref(), &entry, ttl).await {
                warn!("写入缓存失败 {}: {}", entry.key, e);
            }
            Ok(entry)
        }
        .boxed()
        .shared()
    }
}

fn ttl_ms(ttl: Duration) -> i64 {
    ttl.as_millis().min(i64::MAX as u128) as i64
}

async fn write_entry<V: Serialize>(
    store: &dyn SharedStore,
    entry: &CacheEntry<V>,
    ttl: Duration,
) -> Result<(), AppError> {
    let json = serde_json::to_string(entry)
        .map_err(|e| AppError::Internal(format!("序列化缓存条目失败: {}", e)))?;
    store.put(&entry.key, json, ttl).await?;
    Ok(())
}

/// 等待者离开（完成或被取消）时减少计数，最后一个离开的负责移除登记
struct InflightGuard<V> {
    inflight: InflightMap<V>,
    key: String,
    id: u64,
}

impl<V> Drop for InflightGuard<V> {
    fn drop(&mut self) {
        let removed = {
            let Ok(mut inflight) = self.inflight.lock() else {
                return;
            };
            match inflight.get_mut(&self.key) {
                Some(slot) if slot.id == self.id => {
                    slot.waiters = slot.waiters.saturating_sub(1);
                    if slot.waiters == 0 {
                        inflight.remove(&self.key)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        // 在锁外丢弃，未完成的加载在这里被取消
        drop(removed);
    }
}
