//! chromiumoxide 实现 - 基础设施层
//!
//! 持有 Browser / Page 资源，对外只暴露 `PageDriver` 能力。
//! 元素定位统一在页面里用 JS 完成（XPath 与 CSS 都支持，也支持"第 n 行内的子元素"），
//! 需要真实输入事件（点击、键盘、截图）时，先给目标元素打上临时标记，
//! 再通过 CSS 属性选择器拿到 chromiumoxide 的 `Element`。

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Element, Page};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::DriverError;
use crate::infrastructure::driver::{DriverResult, PageDriver, StoredCookie, Target};
use crate::locators::Locator;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const MARK_ATTRIBUTE: &str = "data-crm-target";

static MARK_SEQ: AtomicU64 = AtomicU64::new(1);

/// 页面内的元素查询函数，XPath 与 CSS 都支持
const QUERY_JS: &str = r#"
    const __crmQuery = (kind, expr, root) => {
        const scope = root || document;
        if (kind === 'xpath') {
            const snap = document.evaluate(expr, scope, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
            const out = [];
            for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
            return out;
        }
        return Array.from(scope.querySelectorAll(expr));
    };
"#;

const VISIBLE_JS: &str = r#"
    return els.some(e => {
        const r = e.getBoundingClientRect();
        const s = window.getComputedStyle(e);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    });
"#;

#[derive(Debug, Deserialize)]
struct AttributeLookup {
    found: bool,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdleCheck {
    ok: bool,
    waited_ms: u64,
}

/// chromiumoxide 驱动
///
/// `Page` 内部使用 Arc，可以安全 clone；新标签页共享同一个 Browser
#[derive(Clone)]
pub struct ChromiumDriver {
    browser: Arc<Mutex<Browser>>,
    page: Page,
    handler: Arc<JoinHandle<()>>,
    /// 自己启动的浏览器在结束时关闭；连接的浏览器只关闭自己的页面
    owns_browser: bool,
    navigation_timeout: Duration,
}

impl ChromiumDriver {
    pub fn new(
        browser: Browser,
        page: Page,
        handler: JoinHandle<()>,
        owns_browser: bool,
        navigation_timeout: Duration,
    ) -> Self {
        Self {
            browser: Arc::new(Mutex::new(browser)),
            page,
            handler: Arc::new(handler),
            owns_browser,
            navigation_timeout,
        }
    }

    /// 获取 page 的引用（用于其他操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> DriverResult<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> DriverResult<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 在目标元素集合 `els` 上执行一段脚本
    async fn on_elements<T: DeserializeOwned>(&self, target: &Target, body: &str) -> DriverResult<T> {
        let script = format!(
            "(() => {{ {} const els = {}; {} }})()",
            QUERY_JS,
            elements_expr(target)?,
            body
        );
        self.eval_as(script).await
    }

    /// 把目标元素转换成 chromiumoxide 的 Element
    async fn element(&self, target: &Target) -> DriverResult<Element> {
        let token = MARK_SEQ.fetch_add(1, Ordering::Relaxed).to_string();
        let body = format!(
            r#"
            const e = els[0];
            if (!e) return false;
            document.querySelectorAll('[{attr}]').forEach(x => x.removeAttribute('{attr}'));
            e.setAttribute('{attr}', {token});
            return true;
            "#,
            attr = MARK_ATTRIBUTE,
            token = serde_json::to_string(&token)?
        );
        let marked: bool = self.on_elements(target, &body).await?;
        if !marked {
            return Err(DriverError::ElementNotFound(target.describe()));
        }
        let element = self
            .page
            .find_element(format!("[{}=\"{}\"]", MARK_ATTRIBUTE, token))
            .await?;
        Ok(element)
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> DriverResult<T>
    where
        F: std::future::Future<Output = Result<T, chromiumoxide::error::CdpError>>,
    {
        match tokio::time::timeout(self.navigation_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DriverError::Timeout(what.to_string())),
        }
    }

    async fn page_ids(&self) -> DriverResult<HashSet<String>> {
        let pages = self.browser.lock().await.pages().await?;
        Ok(pages.iter().map(|p| p.target_id().inner().clone()).collect())
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn goto(&self, url: &str) -> DriverResult<()> {
        debug!("导航到: {}", url);
        self.bounded(&format!("打开 {}", url), async {
            self.page.goto(url).await.map(|_| ())
        })
        .await
    }

    async fn reload(&self) -> DriverResult<()> {
        self.bounded("刷新页面", async { self.page.reload().await.map(|_| ()) })
            .await
    }

    async fn go_back(&self) -> DriverResult<()> {
        let _: bool = self
            .eval_as("(() => { history.back(); return true; })()")
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> DriverResult<bool> {
        let timeout_ms = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
        let js = format!(
            r#"(async () => {{
                const timeoutMs = {timeout_ms};
                const idleMs = 500;
                const interval = 100;
                const start = Date.now();
                let lastCount = 0;
                let stableMs = 0;
                try {{ lastCount = performance.getEntriesByType('resource').length; }} catch (_) {{ lastCount = 0; }}
                while (Date.now() - start < timeoutMs) {{
                    await new Promise(r => setTimeout(r, interval));
                    let curCount = lastCount;
                    try {{ curCount = performance.getEntriesByType('resource').length; }} catch (_) {{ curCount = lastCount; }}
                    if (document.readyState === 'complete' && curCount === lastCount) {{
                        stableMs += interval;
                        if (stableMs >= idleMs) {{
                            return {{ ok: true, waitedMs: Date.now() - start }};
                        }}
                    }} else {{
                        stableMs = 0;
                    }}
                    lastCount = curCount;
                }}
                return {{ ok: false, waitedMs: Date.now() - start }};
            }})()"#
        );

        let outer = timeout + Duration::from_secs(5);
        match tokio::time::timeout(outer, self.eval_as::<IdleCheck>(js)).await {
            Ok(Ok(idle)) => {
                debug!("网络空闲检测: ok={} 等待 {}ms", idle.ok, idle.waited_ms);
                Ok(idle.ok)
            }
            Ok(Err(e)) if e.is_timeout() => Ok(false),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("网络空闲检测超时 ({}ms)", timeout_ms);
                Ok(false)
            }
        }
    }

    async fn body_text(&self) -> DriverResult<String> {
        self.eval_as("(() => document.body ? (document.body.innerText || '') : '')()")
            .await
    }

    async fn wait_for_visible(&self, target: &Target, timeout: Duration) -> DriverResult<bool> {
        let start = Instant::now();
        loop {
            let visible: bool = self.on_elements(target, VISIBLE_JS).await?;
            if visible {
                debug!("元素可见 ({}ms): {}", start.elapsed().as_millis(), target.describe());
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                debug!("等待元素超时: {}", target.describe());
                return Ok(false);
            }
            sleep(POLL_INTERVAL.min(timeout)).await;
        }
    }

    async fn count(&self, target: &Target) -> DriverResult<usize> {
        self.on_elements(target, "return els.length;").await
    }

    async fn texts(&self, locator: &Locator) -> DriverResult<Vec<String>> {
        let target = Target::Element(locator.clone());
        self.on_elements(&target, "return els.map(e => (e.textContent || '').trim());")
            .await
    }

    async fn fill(&self, target: &Target, value: &str) -> DriverResult<()> {
        let body = format!(
            r#"
            const e = els[0];
            if (!e) return false;
            e.focus();
            e.value = {};
            e.dispatchEvent(new Event('input', {{ bubbles: true }}));
            e.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;
            "#,
            serde_json::to_string(value)?
        );
        let filled: bool = self.on_elements(target, &body).await?;
        if filled {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(target.describe()))
        }
    }

    async fn type_text(&self, target: &Target, text: &str, key_delay: Duration) -> DriverResult<()> {
        let element = self.element(target).await?;
        element.focus().await?;
        for ch in text.chars() {
            element.type_str(ch.to_string()).await?;
            if !key_delay.is_zero() {
                sleep(key_delay).await;
            }
        }
        Ok(())
    }

    async fn press_key(&self, target: &Target, key: &str) -> DriverResult<()> {
        let element = self.element(target).await?;
        element.press_key(key).await?;
        Ok(())
    }

    async fn click(&self, target: &Target) -> DriverResult<()> {
        let element = self.element(target).await?;
        element.click().await?;
        Ok(())
    }

    async fn scroll_into_view(&self, target: &Target) -> DriverResult<()> {
        let scrolled: bool = self
            .on_elements(
                target,
                "const e = els[0]; if (!e) return false; e.scrollIntoView({ block: 'center', inline: 'center' }); return true;",
            )
            .await?;
        if scrolled {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(target.describe()))
        }
    }

    async fn attribute(&self, target: &Target, name: &str) -> DriverResult<Option<String>> {
        let body = format!(
            "const e = els[0]; return {{ found: !!e, value: e ? e.getAttribute({}) : null }};",
            serde_json::to_string(name)?
        );
        let lookup: AttributeLookup = self.on_elements(target, &body).await?;
        if !lookup.found {
            return Err(DriverError::ElementNotFound(target.describe()));
        }
        Ok(lookup.value)
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> DriverResult<()> {
        let bytes = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(full_page)
                    .build(),
            )
            .await?;
        write_bytes(path, &bytes).await
    }

    async fn screenshot_element(&self, target: &Target, path: &Path) -> DriverResult<()> {
        let element = self.element(target).await?;
        element.scroll_into_view().await?;
        let bytes = element.screenshot(CaptureScreenshotFormat::Png).await?;
        write_bytes(path, &bytes).await
    }

    async fn click_for_new_page(&self, target: &Target, timeout: Duration) -> DriverResult<Self> {
        let before = self.page_ids().await?;
        self.click(target).await?;

        let start = Instant::now();
        loop {
            let pages = self.browser.lock().await.pages().await?;
            if let Some(page) = pages
                .into_iter()
                .find(|p| !before.contains(p.target_id().inner()))
            {
                debug!("捕获到新标签页: {}", page.target_id().inner());
                return Ok(Self {
                    browser: Arc::clone(&self.browser),
                    page,
                    handler: Arc::clone(&self.handler),
                    owns_browser: self.owns_browser,
                    navigation_timeout: self.navigation_timeout,
                });
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::Timeout(format!(
                    "点击 {} 后没有打开新标签页",
                    target.describe()
                )));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&self) -> DriverResult<()> {
        self.page.clone().close().await?;
        Ok(())
    }

    async fn cookies(&self) -> DriverResult<Vec<StoredCookie>> {
        let cookies = self.page.get_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
                // 会话 cookie 的 expires 为 -1
                expires: (c.expires > 0.0).then_some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> DriverResult<()> {
        let params: Vec<CookieParam> = cookies.iter().map(cookie_param).collect();
        self.page.set_cookies(params).await?;
        Ok(())
    }

    async fn shutdown(&self) -> DriverResult<()> {
        let result = if self.owns_browser {
            let mut browser = self.browser.lock().await;
            let closed = browser.close().await.map(|_| ());
            if let Err(e) = browser.wait().await {
                warn!("等待浏览器进程退出失败: {}", e);
            }
            closed
        } else {
            self.page.clone().close().await
        };
        self.handler.abort();
        result?;
        Ok(())
    }
}

/// 生成"目标元素集合"的 JS 表达式
fn elements_expr(target: &Target) -> DriverResult<String> {
    Ok(match target {
        Target::Element(locator) => query_expr(locator, "null")?,
        Target::InRow { rows, index, child } => format!(
            "((rows) => rows[{index}] ? {} : [])({})",
            query_expr(child, &format!("rows[{index}]"))?,
            query_expr(rows, "null")?,
        ),
    })
}

fn query_expr(locator: &Locator, root: &str) -> DriverResult<String> {
    Ok(format!(
        "__crmQuery({}, {}, {})",
        serde_json::to_string(locator.kind())?,
        serde_json::to_string(locator.expression())?,
        root
    ))
}

async fn write_bytes(path: &Path, bytes: &[u8]) -> DriverResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DriverError::io(parent, e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| DriverError::io(path, e))
}

fn cookie_param(cookie: &StoredCookie) -> CookieParam {
    let mut param = CookieParam::new(cookie.name.clone(), cookie.value.clone());
    param.domain = cookie.domain.clone();
    param.path = cookie.path.clone();
    param.secure = Some(cookie.secure);
    param.http_only = Some(cookie.http_only);
    param.expires = cookie
        .expires
        .filter(|expires| *expires > 0.0)
        .map(TimeSinceEpoch::new);
    param
}
