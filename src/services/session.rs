//! 会话管理 - 业务能力层
//!
//! 负责启动浏览器、登录 CRM、保存 / 复用登录状态。
//! 登录失败属于致命错误，返回前会释放浏览器。

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use chrono::Utc;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::LoginError;
use crate::infrastructure::{BrowserLauncher, DriverResult, PageDriver, StoredCookie};
use crate::locators::{LocatorTable, PageElement};
use crate::services::diagnostics::Diagnostics;
use crate::utils::{ms, pause};

/// 登录尝试次数
pub const LOGIN_ATTEMPTS: u32 = 3;

static GREETING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(welcome|hello)\b").unwrap());

/// 已登录的浏览器会话
///
/// 整个运行期间独占；`release` 消耗自身，保证只释放一次
pub struct SessionHandle<D: PageDriver> {
    driver: D,
}

impl<D: PageDriver> SessionHandle<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// 关闭浏览器会话
    pub async fn release(self) {
        info!("🧹 正在关闭浏览器会话...");
        match self.driver.shutdown().await {
            Ok(()) => debug!("浏览器会话已关闭"),
            Err(e) => warn!("⚠️ 关闭浏览器时出错: {}", e),
        }
    }
}

/// 会话管理服务
pub struct SessionManager {
    config: Arc<Config>,
    locators: Arc<LocatorTable>,
    diagnostics: Diagnostics,
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(config: Arc<Config>, locators: Arc<LocatorTable>, cancel: CancellationToken) -> Self {
        let diagnostics = Diagnostics::new(config.diagnostics_dir.clone());
        Self {
            config,
            locators,
            diagnostics,
            cancel,
        }
    }

    /// 启动浏览器并登录
    pub async fn establish<L: BrowserLauncher>(
        &self,
        launcher: &L,
    ) -> Result<SessionHandle<L::Driver>, LoginError> {
        info!("🔐 正在登录 CRM: {}", self.config.crm_url);

        let driver = launcher
            .launch(&self.config.launch_settings())
            .await
            .map_err(LoginError::Launch)?;
        let session = SessionHandle::new(driver);

        match self.login(session.driver()).await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.release().await;
                Err(e)
            }
        }
    }

    async fn login<D: PageDriver>(&self, driver: &D) -> Result<(), LoginError> {
        let restored = self.restore_state(driver).await;

        let url = &self.config.crm_url;
        driver
            .goto(url)
            .await
            .map_err(|source| LoginError::Unreachable {
                url: url.clone(),
                source,
            })?;
        self.smart_wait(driver).await;

        if restored && self.is_logged_in(driver).await {
            info!("✓ 已复用保存的登录状态，跳过登录");
            self.persist_state(driver).await;
            return Ok(());
        }

        let mut attempts = 0;
        while attempts < LOGIN_ATTEMPTS {
            attempts += 1;
            info!("🔑 登录尝试 {}/{}...", attempts, LOGIN_ATTEMPTS);

            match self.attempt_login(driver).await {
                Ok(true) => {
                    info!("✅ 登录成功");
                    self.persist_state(driver).await;
                    return Ok(());
                }
                Ok(false) => warn!("⚠️ 第 {} 次登录未能确认登录状态", attempts),
                Err(e) => warn!("⚠️ 第 {} 次登录出错: {}", attempts, e),
            }
            self.diagnostics.capture(driver, "login_attempt.png").await;

            if attempts < LOGIN_ATTEMPTS {
                if !pause(&self.cancel, ms(self.config.timing.login_retry_delay_ms)).await {
                    warn!("⏹️ 登录过程中收到取消请求");
                    return Err(LoginError::Cancelled);
                }
                if let Err(e) = driver.reload().await {
                    warn!("⚠️ 刷新登录页失败: {}", e);
                }
                self.smart_wait(driver).await;
            }
        }

        error!("❌ 所有登录尝试均失败");
        self.diagnostics.capture(driver, "login_failed.png").await;
        Err(LoginError::AttemptsExhausted { attempts })
    }

    /// 单次登录：填写用户名、密码，点击登录，再验证
    async fn attempt_login<D: PageDriver>(&self, driver: &D) -> DriverResult<bool> {
        let timing = &self.config.timing;

        let username = self.locators.target(PageElement::Username);
        if !driver
            .wait_for_visible(&username, ms(timing.selector_timeout_ms))
            .await?
        {
            warn!("未找到用户名输入框");
            return Ok(false);
        }
        debug!("✓ 找到用户名输入框");
        driver.fill(&username, &self.config.username).await?;

        let password = self.locators.target(PageElement::Password);
        if !driver
            .wait_for_visible(&password, ms(timing.short_selector_timeout_ms))
            .await?
        {
            warn!("未找到密码输入框");
            return Ok(false);
        }
        driver.fill(&password, &self.config.password).await?;

        let button = self.locators.target(PageElement::LoginButton);
        if !driver
            .wait_for_visible(&button, ms(timing.short_selector_timeout_ms))
            .await?
        {
            warn!("未找到登录按钮");
            return Ok(false);
        }
        debug!("✓ 点击登录按钮");
        driver.click(&button).await?;

        driver
            .wait_for_network_idle(ms(timing.network_idle_timeout_ms))
            .await?;
        pause(&self.cancel, ms(timing.login_grace_ms)).await;

        Ok(self.is_logged_in(driver).await)
    }

    /// 按顺序检查：退出按钮 → 非登录页且有页面骨架 → 欢迎语 / 用户名
    pub async fn is_logged_in<D: PageDriver>(&self, driver: &D) -> bool {
        match self.check_logged_in(driver).await {
            Ok(logged_in) => logged_in,
            Err(e) => {
                debug!("登录状态检查出错: {}", e);
                false
            }
        }
    }

    async fn check_logged_in<D: PageDriver>(&self, driver: &D) -> DriverResult<bool> {
        let timing = &self.config.timing;

        let logout = self.locators.target(PageElement::LogoutButton);
        if driver
            .wait_for_visible(&logout, ms(timing.short_selector_timeout_ms))
            .await?
        {
            debug!("✓ 找到退出按钮");
            return Ok(true);
        }

        let url = driver.current_url().await?;
        if !is_login_url(&url)
            && driver
                .count(&self.locators.target(PageElement::DashboardShell))
                .await?
                > 0
        {
            debug!("✓ 已离开登录页，且页面骨架存在: {}", url);
            return Ok(true);
        }

        let text = driver.body_text().await?;
        if shows_greeting(&text)
            || driver
                .count(&self.locators.target(PageElement::ProfileName))
                .await?
                > 0
        {
            debug!("✓ 找到欢迎信息");
            return Ok(true);
        }

        debug!("✗ 无法确认登录状态");
        Ok(false)
    }

    /// 等待网络空闲和页面渲染；内容过少时再多等一会
    async fn smart_wait<D: PageDriver>(&self, driver: &D) {
        let timing = &self.config.timing;
        let start = Instant::now();

        match driver
            .wait_for_network_idle(ms(timing.network_idle_timeout_ms))
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("网络未完全空闲，继续"),
            Err(e) => warn!("⚠️ 等待页面加载被中断: {}", e),
        }
        pause(&self.cancel, ms(timing.page_render_grace_ms)).await;

        match driver.body_text().await {
            Ok(text) if text.trim().chars().count() > timing.min_body_chars => {
                debug!("✓ 页面已有内容");
            }
            _ => {
                warn!("⚠️ 页面内容较少，继续等待...");
                pause(&self.cancel, ms(timing.thin_content_wait_ms)).await;
            }
        }

        debug!("页面等待耗时 {:.1}s", start.elapsed().as_secs_f64());
    }

    /// 恢复保存的 cookie，成功返回 true
    async fn restore_state<D: PageDriver>(&self, driver: &D) -> bool {
        let Some(path) = &self.config.storage_state else {
            return false;
        };
        if !path.exists() {
            debug!("没有保存的登录状态: {}", path.display());
            return false;
        }

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("⚠️ 读取登录状态失败 ({}): {}", path.display(), e);
                return false;
            }
        };
        let cookies: Vec<StoredCookie> = match serde_json::from_str(&content) {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!("⚠️ 登录状态文件无效，将重新登录: {}", e);
                return false;
            }
        };
        let total = cookies.len();
        let cookies = live_cookies(cookies, Utc::now().timestamp() as f64);
        if cookies.len() < total {
            debug!("丢弃 {} 个已过期的 cookie", total - cookies.len());
        }
        if cookies.is_empty() {
            return false;
        }

        match driver.set_cookies(&cookies).await {
            Ok(()) => {
                info!("✓ 已恢复 {} 个 cookie", cookies.len());
                true
            }
            Err(e) => {
                warn!("⚠️ 恢复登录状态失败: {}", e);
                false
            }
        }
    }

    /// 保存 cookie 供下次运行复用
    async fn persist_state<D: PageDriver>(&self, driver: &D) {
        let Some(path) = &self.config.storage_state else {
            return;
        };

        let cookies = match driver.cookies().await {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!("⚠️ 读取 cookie 失败: {}", e);
                return;
            }
        };
        let content = match serde_json::to_string_pretty(&cookies) {
            Ok(content) => content,
            Err(e) => {
                warn!("⚠️ 序列化登录状态失败: {}", e);
                return;
            }
        };
        match tokio::fs::write(path, content).await {
            Ok(()) => debug!("登录状态已保存: {}", path.display()),
            Err(e) => warn!("⚠️ 保存登录状态失败 ({}): {}", path.display(), e),
        }
    }
}

fn is_login_url(url: &str) -> bool {
    let lowered = url.to_lowercase();
    lowered.contains("login") || lowered.contains("signin")
}

fn shows_greeting(text: &str) -> bool {
    GREETING.is_match(text)
}

fn live_cookies(cookies: Vec<StoredCookie>, now: f64) -> Vec<StoredCookie> {
    cookies
        .into_iter()
        .filter(|cookie| !cookie.is_expired_at(now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_url_detection() {
        assert!(is_login_url("https://crm.example.com/Login.aspx"));
        assert!(is_login_url("https://crm.example.com/auth/signin?next=/"));
        assert!(!is_login_url("https://crm.example.com/dashboard"));
    }

    #[test]
    fn test_greeting_is_a_whole_word() {
        assert!(shows_greeting("Welcome back, Alice"));
        assert!(shows_greeting("HELLO admin"));
        assert!(!shows_greeting("Othello report"));
    }

    #[test]
    fn test_expired_cookies_are_not_restored() {
        let cookie = |name: &str, expires: Option<f64>| StoredCookie {
            name: name.into(),
            value: "v".into(),
            domain: None,
            path: None,
            expires,
            http_only: false,
            secure: false,
        };
        let now = 1_700_000_000.0;
        let kept = live_cookies(
            vec![
                cookie("stale", Some(now - 60.0)),
                cookie("fresh", Some(now + 3600.0)),
                cookie("session", None),
                cookie("browser_session", Some(-1.0)),
            ],
            now,
        );
        let names: Vec<_> = kept.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["fresh", "session", "browser_session"]);
    }
}
