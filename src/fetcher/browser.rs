//! W3C WebDriver 协议驱动的浏览器抓取
//!
//! 直接通过 HTTP 和 chromedriver / selenium 通信，每次抓取一个独立会话，
//! 结束（包括出错和被取消）时删除会话。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::http::map_reqwest_error;
use super::{FetchError, FetchHints, Fetcher, Paginator, RawContent, SearchForm};
use crate::models::FetchTarget;

/// WebDriver 规范里元素引用的键名
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// 点击“加载更多”的脚本，按钮不存在或不可见时返回 false
const CLICK_IF_VISIBLE: &str = r#"
var el = document.querySelector(arguments[0]);
if (!el || el.offsetParent === null) { return false; }
el.click();
return true;
"#;

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub user_agent: String,
    /// 等待元素出现的最长时间
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    /// 每次点击“加载更多”之后的等待
    pub expand_delay: Duration,
    pub max_expands: u32,
    /// 翻页上限，包括第一页
    pub max_pages: u32,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0".into(),
            wait_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(250),
            expand_delay: Duration::from_millis(1500),
            max_expands: 30,
            max_pages: 20,
        }
    }
}

pub struct BrowserFetcher {
    client: Client,
    webdriver_url: String,
    options: BrowserOptions,
}

impl BrowserFetcher {
    pub fn new(webdriver_url: &str, timeout: Duration, options: BrowserOptions) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webdriver_url: webdriver_url.trim_end_matches('/').to_string(),
            options,
        })
    }

    async fn new_session(&self) -> Result<Session, FetchError> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--no-sandbox",
                            "--disable-dev-shm-usage",
                            "--disable-gpu",
                            "--lang=ko-KR",
                            format!("--user-agent={}", self.options.user_agent),
                        ]
                    }
                }
            }
        });

        let url = format!("{}/session", self.webdriver_url);
        let value = command(&self.client, reqwest::Method::POST, &url, Some(capabilities)).await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::Browser {
                message: "创建会话的响应缺少 sessionId".into(),
                transient: true,
            })?;

        debug!("WebDriver 会话已创建 {}", id);
        Ok(Session {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.webdriver_url, id),
        })
    }

    async fn wait_for(&self, session: &Session, selector: &str, url: &str) -> Result<(), FetchError> {
        let deadline = Instant::now() + self.options.wait_timeout;
        loop {
            if !session.find_all(selector).await?.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("等待元素超时 {} @ {}", selector, url);
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                });
            }
            sleep(self.options.poll_interval).await;
        }
    }

    /// 等到元素从页面上消失（被 AJAX 替换）
    async fn wait_stale(&self, session: &Session, element: &str, url: &str) -> Result<(), FetchError> {
        let deadline = Instant::now() + self.options.wait_timeout;
        loop {
            match session.get(&format!("element/{}/name", element)).await {
                Ok(_) => {}
                Err(e) if is_gone(&e) => return Ok(()),
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                warn!("等待旧结果失效超时 {}", url);
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                });
            }
            sleep(self.options.poll_interval).await;
        }
    }

    /// 依次点击“下一页”，返回后续每一页的源码
    async fn collect_pages(&self, session: &Session, pager: &Paginator, url: &str) -> Result<Vec<String>, FetchError> {
        let mut pages = Vec::new();
        for _ in 1..self.options.max_pages {
            let Some(next) = session.find_first(pager.next).await? else {
                return Ok(pages);
            };
            let class = session
                .get(&format!("element/{}/attribute/class", next))
                .await?;
            let disabled = class
                .as_str()
                .is_some_and(|classes| classes.split_whitespace().any(|c| c == pager.disabled_class));
            if disabled {
                return Ok(pages);
            }
            let Some(first_row) = session.find_first(pager.rows).await? else {
                return Ok(pages);
            };

            session
                .post(&format!("element/{}/click", next), json!({}))
                .await?;
            self.wait_stale(session, &first_row, url).await?;
            pages.push(session.source().await?);
        }
        warn!("达到翻页上限 {} @ {}", self.options.max_pages, url);
        Ok(pages)
    }

    async fn submit_form(&self, session: &Session, form: &SearchForm, target: &FetchTarget) -> Result<(), FetchError> {
        let text = target
            .params()
            .iter()
            .find(|(k, _)| k == form.param)
            .map(|(_, v)| v.as_str())
            .unwrap_or_default();

        let input = session.find_one(form.input).await?;
        session
            .post(&format!("element/{}/value", input), json!({ "text": text }))
            .await?;
        let submit = session.find_one(form.submit).await?;
        session
            .post(&format!("element/{}/click", submit), json!({}))
            .await?;
        Ok(())
    }

    async fn expand_all(&self, session: &Session, selector: &str) -> Result<u32, FetchError> {
        let mut clicks = 0;
        while clicks < self.options.max_expands {
            let clicked = session
                .post(
                    "execute/sync",
                    json!({ "script": CLICK_IF_VISIBLE, "args": [selector] }),
                )
                .await?;
            if clicked.as_bool() != Some(true) {
                break;
            }
            clicks += 1;
            sleep(self.options.expand_delay).await;
        }
        Ok(clicks)
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn fetch(&self, target: &FetchTarget, hints: FetchHints) -> Result<RawContent, FetchError> {
        let url = target.canonical();
        let session = self.new_session().await?;

        // 有搜索表单时从不带参数的页面开始，由表单提交搜索
        let start = match &hints.search_form {
            Some(_) => {
                let mut base = target.url();
                base.set_query(None);
                base.to_string()
            }
            None => url.clone(),
        };
        session.post("url", json!({ "url": start })).await?;

        // 页面一打开就有默认结果的站点，先记下旧的第一行
        let stale = match hints.stale_after_submit {
            Some(selector) => session.find_first(selector).await?,
            None => None,
        };
        if let Some(form) = &hints.search_form {
            self.submit_form(&session, form, target).await?;
        }
        if let Some(element) = stale {
            self.wait_stale(&session, &element, &url).await?;
        }
        if let Some(selector) = hints.wait_for {
            self.wait_for(&session, selector, &url).await?;
        }
        if let Some(selector) = hints.expand {
            let clicks = self.expand_all(&session, selector).await?;
            debug!("点击加载更多 {} 次 {}", clicks, url);
        }

        let mut body = session.source().await?;
        if let Some(pager) = &hints.paginate {
            let rest = self.collect_pages(&session, pager, &url).await?;
            debug!("共 {} 页 {}", rest.len() + 1, url);
            // 多页源码直接拼接，重复记录由解析去重
            for page in rest {
                body.push_str(&page);
            }
        }
        session.close().await;

        Ok(RawContent {
            url,
            status: 200,
            content_type: Some("text/html".into()),
            body,
        })
    }
}

/// 一个 WebDriver 会话，丢弃时在后台删除
struct Session {
    client: Client,
    base: String,
}

impl Session {
    async fn post(&self, path: &str, body: Value) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.base, path);
        command(&self.client, reqwest::Method::POST, &url, Some(body)).await
    }

    async fn get(&self, path: &str) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.base, path);
        command(&self.client, reqwest::Method::GET, &url, None).await
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<Value>, FetchError> {
        let value = self
            .post("elements", json!({ "using": "css selector", "value": selector }))
            .await?;
        Ok(value.as_array().cloned().unwrap_or_default())
    }

    async fn find_first(&self, selector: &str) -> Result<Option<String>, FetchError> {
        Ok(self
            .find_all(selector)
            .await?
            .first()
            .and_then(|el| el.get(ELEMENT_KEY))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn source(&self) -> Result<String, FetchError> {
        let source = self.get("source").await?;
        Ok(source.as_str().unwrap_or_default().to_string())
    }

    async fn find_one(&self, selector: &str) -> Result<String, FetchError> {
        let value = self
            .post("element", json!({ "using": "css selector", "value": selector }))
            .await?;
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| FetchError::Browser {
                message: format!("找不到元素 {}", selector),
                transient: false,
            })
    }

    async fn close(mut self) {
        // 取走地址后 Drop 不会再删除一次
        let base = std::mem::take(&mut self.base);
        if let Err(e) = self.client.delete(&base).send().await {
            warn!("删除 WebDriver 会话失败 {}: {}", base, e);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let base = std::mem::take(&mut self.base);
        if base.is_empty() {
            return;
        }
        let client = self.client.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = client.delete(&base).send().await {
                    warn!("删除 WebDriver 会话失败 {}: {}", base, e);
                }
            });
        }
    }
}

/// 元素已被替换或移除
fn is_gone(err: &FetchError) -> bool {
    match err {
        FetchError::Browser { message, .. } => {
            message.starts_with("stale element reference") || message.starts_with("no such element")
        }
        _ => false,
    }
}

/// 发送一条 WebDriver 命令，返回响应里的 `value`
async fn command(
    client: &Client,
    method: reqwest::Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, FetchError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.map_err(|e| match map_reqwest_error(url, e) {
        FetchError::Timeout { url } => FetchError::Timeout { url },
        other => FetchError::Browser {
            message: other.to_string(),
            transient: true,
        },
    })?;

    let status = response.status();
    let payload: Value = response.json().await.map_err(|e| FetchError::Browser {
        message: format!("WebDriver 响应无法解析: {}", e),
        transient: true,
    })?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(FetchError::Browser {
            message: format!("{}: {}", error, message),
            transient: status.is_server_error() && error != "no such element",
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::{
        Json, Router,
        extract::{Path, State},
        http::StatusCode,
        routing::{delete, get, post},
    };

    use super::*;
    use crate::parser::profile::MYTT;

    /// 第 0 页是打开页面时的默认列表，提交搜索后变为第 1 页
    #[derive(Default)]
    struct DriverState {
        log: Vec<String>,
        page: usize,
        pending: Option<(Instant, usize)>,
        last_page: usize,
    }

    impl DriverState {
        fn page(&mut self) -> usize {
            if let Some((at, page)) = self.pending {
                if Instant::now() >= at {
                    self.page = page;
                    self.pending = None;
                }
            }
            self.page
        }
    }

    #[derive(Clone, Default)]
    struct Driver {
        state: Arc<Mutex<DriverState>>,
        /// 搜索结果在点击提交之后多久出现
        submit_delay: Duration,
    }

    impl Driver {
        fn new(last_page: usize, submit_delay: Duration) -> Self {
            let state = DriverState {
                last_page,
                ..Default::default()
            };
            Self {
                state: Arc::new(Mutex::new(state)),
                submit_delay,
            }
        }

        fn push(&self, entry: impl Into<String>) {
            self.state.lock().unwrap().log.push(entry.into());
        }

        fn log(&self) -> Vec<String> {
            self.state.lock().unwrap().log.clone()
        }
    }

    fn ok(value: Value) -> (StatusCode, Json<Value>) {
        (StatusCode::OK, Json(json!({ "value": value })))
    }

    async fn serve(driver: Driver) -> SocketAddr {
        let router = Router::new()
            .route(
                "/session",
                post(|State(d): State<Driver>| async move {
                    d.push("new");
                    ok(json!({ "sessionId": "s1", "capabilities": {} }))
                }),
            )
            .route(
                "/session/{id}/url",
                post(|State(d): State<Driver>, Json(body): Json<Value>| async move {
                    d.push(format!("goto {}", body["url"].as_str().unwrap_or_default()));
                    ok(Value::Null)
                }),
            )
            .route(
                "/session/{id}/elements",
                post(|State(d): State<Driver>, Json(body): Json<Value>| async move {
                    let selector = body["value"].as_str().unwrap_or_default().to_string();
                    let mut state = d.state.lock().unwrap();
                    if selector.contains("paginator") {
                        return ok(json!([{ ELEMENT_KEY: "next" }]));
                    }
                    state.log.push("elements".into());
                    let page = state.page();
                    ok(json!([{ ELEMENT_KEY: format!("row-{page}") }]))
                }),
            )
            .route(
                "/session/{id}/element",
                post(|| async { ok(json!({ ELEMENT_KEY: "e2" })) }),
            )
            .route(
                "/session/{id}/element/{el}/value",
                post(|State(d): State<Driver>, Json(body): Json<Value>| async move {
                    d.push(format!("type {}", body["text"].as_str().unwrap_or_default()));
                    ok(Value::Null)
                }),
            )
            .route(
                "/session/{id}/element/{el}/click",
                post(
                    |State(d): State<Driver>, Path((_, el)): Path<(String, String)>| async move {
                        let mut state = d.state.lock().unwrap();
                        if el == "next" {
                            state.log.push("next".into());
                            let page = state.page();
                            state.page = page + 1;
                        } else {
                            state.log.push("click".into());
                            state.pending = Some((Instant::now() + d.submit_delay, 1));
                        }
                        ok(Value::Null)
                    },
                ),
            )
            .route(
                "/session/{id}/element/{el}/name",
                get(
                    |State(d): State<Driver>, Path((_, el)): Path<(String, String)>| async move {
                        let page = d.state.lock().unwrap().page();
                        if el == format!("row-{page}") {
                            ok(json!("tr"))
                        } else {
                            let error = json!({ "error": "stale element reference", "message": "gone" });
                            (StatusCode::NOT_FOUND, Json(json!({ "value": error })))
                        }
                    },
                ),
            )
            .route(
                "/session/{id}/element/{el}/attribute/{name}",
                get(|State(d): State<Driver>| async move {
                    let mut state = d.state.lock().unwrap();
                    let last = state.page() >= state.last_page;
                    let class = if last {
                        "ui-paginator-next ui-state-disabled"
                    } else {
                        "ui-paginator-next"
                    };
                    ok(json!(class))
                }),
            )
            .route(
                "/session/{id}/execute/sync",
                post(|| async { ok(json!(false)) }),
            )
            .route(
                "/session/{id}/source",
                get(|State(d): State<Driver>| async move {
                    let page = d.state.lock().unwrap().page();
                    let body = if page == 0 {
                        "<html><body>DEFAULT_WINNER_LIST</body></html>".to_string()
                    } else {
                        format!("<html><body>RESULTS_PAGE_{page}</body></html>")
                    };
                    ok(json!(body))
                }),
            )
            .route(
                "/session/{id}",
                delete(|State(d): State<Driver>, Path(id): Path<String>| async move {
                    d.push(format!("delete {id}"));
                    ok(Value::Null)
                }),
            )
            .with_state(driver);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        addr
    }

    fn fetcher(addr: SocketAddr, wait_timeout: Duration) -> BrowserFetcher {
        let options = BrowserOptions {
            wait_timeout,
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        };
        BrowserFetcher::new(&format!("http://{addr}/"), Duration::from_secs(5), options).unwrap()
    }

    #[tokio::test]
    async fn test_browser_session_flow() {
        let driver = Driver::new(1, Duration::ZERO);
        let addr = serve(driver.clone()).await;
        let fetcher = fetcher(addr, Duration::from_secs(5));

        let target =
            FetchTarget::parse("https://www.airping.co.kr/11player/01.php?player_search_keyword=kim")
                .unwrap();
        let hints = FetchHints {
            wait_for: Some("li._mc_div"),
            search_form: Some(SearchForm {
                input: "#player_search_keyword",
                submit: ".player_search_btn",
                param: "player_search_keyword",
            }),
            expand: Some("._cc_view_more_btn"),
            ..Default::default()
        };

        let page = fetcher.fetch(&target, hints).await.unwrap();
        assert!(page.body.contains("RESULTS_PAGE_1"));
        assert_eq!(
            driver.log(),
            vec![
                "new",
                "goto https://www.airping.co.kr/11player/01.php",
                "type kim",
                "click",
                "elements",
                "delete s1",
            ]
        );
    }

    #[tokio::test]
    async fn test_waits_for_old_rows_to_go_stale() {
        // 默认列表一直有行，搜索结果在点击 300ms 之后才替换它
        let driver = Driver::new(1, Duration::from_millis(300));
        let addr = serve(driver.clone()).await;
        let fetcher = fetcher(addr, Duration::from_secs(5));

        let page = fetcher
            .fetch(&MYTT.search_target("홍길동").unwrap(), MYTT.hints())
            .await
            .unwrap();
        assert_eq!(page.body, "<html><body>RESULTS_PAGE_1</body></html>");
        assert!(driver.log().contains(&"type 홍길동".to_string()));
    }

    #[tokio::test]
    async fn test_results_never_replaced_times_out() {
        let driver = Driver::new(1, Duration::from_secs(60));
        let addr = serve(driver).await;
        let fetcher = fetcher(addr, Duration::from_millis(200));

        let err = fetcher
            .fetch(&MYTT.search_target("홍길동").unwrap(), MYTT.hints())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_follows_paginator_until_disabled() {
        let driver = Driver::new(2, Duration::from_millis(50));
        let addr = serve(driver.clone()).await;
        let fetcher = fetcher(addr, Duration::from_secs(5));

        let page = fetcher
            .fetch(&MYTT.search_target("홍길동").unwrap(), MYTT.hints())
            .await
            .unwrap();
        assert!(page.body.contains("RESULTS_PAGE_1"));
        assert!(page.body.contains("RESULTS_PAGE_2"));
        assert!(!page.body.contains("DEFAULT_WINNER_LIST"));
        let nexts = driver.log().iter().filter(|e| *e == "next").count();
        assert_eq!(nexts, 1);
    }

    #[tokio::test]
    async fn test_missing_driver_is_transient() {
        let fetcher = BrowserFetcher::new(
            "http://127.0.0.1:1",
            Duration::from_secs(1),
            BrowserOptions::default(),
        )
        .unwrap();
        let target = FetchTarget::parse("https://example.com/").unwrap();
        let err = fetcher
            .fetch(&target, FetchHints::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
