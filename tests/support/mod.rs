//! 测试用的内存 CRM 站点
//!
//! `FakeDriver` 按定位表识别元素，模拟登录页、搜索页、结果表格、详情页和发票标签页，
//! 并记录每一次操作，供测试断言调用顺序。

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio_util::sync::CancellationToken;

use crm_invoice_fetch::config::{Config, Timing};
use crm_invoice_fetch::error::DriverError;
use crm_invoice_fetch::infrastructure::{
    BrowserLauncher, DriverResult, LaunchSettings, PageDriver, StoredCookie, Target,
};
use crm_invoice_fetch::locators::{Locator, LocatorTable, PageElement};

pub const CRM_URL: &str = "https://crm.test";
pub const SESSION_COOKIE: &str = "crm_session";

/// 详情页上发票的呈现方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceMode {
    /// 点击链接打开新标签页
    NewTab,
    /// 内嵌 base64 jpeg，链接不打开新标签页
    DataImage,
    /// 内嵌 http 图片地址
    RemoteImage,
    /// 只有链接区域，可截图
    RegionOnly,
    /// 详情页没有发票
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Blank,
    Login,
    Dashboard,
    Search,
    Results,
    Details,
    ImageViewer,
}

pub struct Site {
    pub locators: LocatorTable,
    pub login_succeeds: bool,
    pub launch_fails: bool,
    /// 系统中存在的订单
    pub orders: HashMap<String, InvoiceMode>,
    /// 前 n 次搜索该订单时结果表格为空
    pub flaky: HashMap<String, usize>,
    /// 搜索到这个订单时触发 panic
    pub panic_on: Option<String>,
    /// 搜索到这个订单时触发取消
    pub cancel_on: Option<(String, CancellationToken)>,
    /// 点击登录按钮时触发取消
    pub cancel_on_login: Option<CancellationToken>,
    /// 导航菜单不存在
    pub broken_menu: bool,
    /// 在这个订单的详情页查找发票时浏览器断开
    pub disconnect_on: Option<String>,

    pub screen: Screen,
    pub previous: Option<Screen>,
    pub logged_in: bool,
    pub typed: String,
    pub query: Option<String>,
    pub current_order: Option<String>,

    pub calls: Vec<String>,
    pub search_count: HashMap<String, usize>,
    pub tabs_closed: usize,
    pub shutdowns: usize,
}

impl Site {
    pub fn new() -> Self {
        Self {
            locators: LocatorTable::new(),
            login_succeeds: true,
            launch_fails: false,
            orders: HashMap::new(),
            flaky: HashMap::new(),
            panic_on: None,
            cancel_on: None,
            cancel_on_login: None,
            broken_menu: false,
            disconnect_on: None,
            screen: Screen::Blank,
            previous: None,
            logged_in: false,
            typed: String::new(),
            query: None,
            current_order: None,
            calls: Vec::new(),
            search_count: HashMap::new(),
            tabs_closed: 0,
            shutdowns: 0,
        }
    }

    pub fn with_order(mut self, id: &str, mode: InvoiceMode) -> Self {
        self.orders.insert(id.to_string(), mode);
        self
    }

    pub fn with_flaky(mut self, id: &str, empty_searches: usize) -> Self {
        self.flaky.insert(id.to_string(), empty_searches);
        self
    }

    pub fn failing_login(mut self) -> Self {
        self.login_succeeds = false;
        self
    }

    pub fn without_menu(mut self) -> Self {
        self.broken_menu = true;
        self
    }

    pub fn disconnecting_on(mut self, id: &str) -> Self {
        self.disconnect_on = Some(id.to_string());
        self
    }

    pub fn shared(self) -> Arc<Mutex<Site>> {
        Arc::new(Mutex::new(self))
    }

    fn element(&self, locator: &Locator) -> Option<PageElement> {
        self.locators.element_of(locator)
    }

    fn logged_in_screen(&self) -> bool {
        matches!(
            self.screen,
            Screen::Dashboard | Screen::Search | Screen::Results | Screen::Details
        )
    }

    fn invoice_mode(&self) -> Option<InvoiceMode> {
        self.current_order
            .as_ref()
            .and_then(|id| self.orders.get(id))
            .copied()
    }

    /// 当前查询是否有结果行
    fn has_rows(&self) -> bool {
        if self.screen != Screen::Results {
            return false;
        }
        let Some(query) = &self.query else {
            return false;
        };
        if !self.orders.contains_key(query) {
            return false;
        }
        let searches = self.search_count.get(query).copied().unwrap_or(0);
        searches > self.flaky.get(query).copied().unwrap_or(0)
    }

    fn count_element(&self, element: PageElement) -> usize {
        let present = match element {
            PageElement::Username | PageElement::Password | PageElement::LoginButton => {
                self.screen == Screen::Login
            }
            PageElement::LogoutButton | PageElement::DashboardShell => self.logged_in_screen(),
            PageElement::JobSearchMenu | PageElement::JobSearchLink => {
                self.logged_in_screen() && !self.broken_menu
            }
            PageElement::ProfileName => false,
            PageElement::SearchInput => matches!(self.screen, Screen::Search | Screen::Results),
            PageElement::ResultRows => self.has_rows(),
            PageElement::RowAction | PageElement::RowActionFallback => false,
            PageElement::InvoiceLink => {
                self.screen == Screen::Details
                    && !matches!(self.invoice_mode(), Some(InvoiceMode::Nothing) | None)
            }
            PageElement::InvoiceImage => {
                self.screen == Screen::Details
                    && matches!(
                        self.invoice_mode(),
                        Some(InvoiceMode::DataImage) | Some(InvoiceMode::RemoteImage)
                    )
            }
        };
        usize::from(present)
    }

    fn count(&self, target: &Target) -> usize {
        match target {
            Target::Element(locator) => self
                .element(locator)
                .map(|e| self.count_element(e))
                .unwrap_or(0),
            Target::InRow { index, child, .. } => {
                let row_exists = self.has_rows() && *index == 0;
                let is_action = self.element(child) == Some(PageElement::RowAction);
                usize::from(row_exists && is_action)
            }
        }
    }

    fn require(&self, target: &Target) -> DriverResult<()> {
        if self.count(target) > 0 {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(target.describe()))
        }
    }

    fn target_element(&self, target: &Target) -> Option<PageElement> {
        match target {
            Target::Element(locator) => self.element(locator),
            Target::InRow { child, .. } => self.element(child),
        }
    }
}

/// 内存中的页面驱动
#[derive(Clone)]
pub struct FakeDriver {
    site: Arc<Mutex<Site>>,
    tab: bool,
}

impl FakeDriver {
    fn site(&self) -> MutexGuard<'_, Site> {
        self.site.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> DriverResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DriverError::io(parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| DriverError::io(path, e))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl PageDriver for FakeDriver {
    async fn goto(&self, url: &str) -> DriverResult<()> {
        let mut site = self.site();
        site.calls.push(format!("goto {}", url));
        if url.starts_with("https://img.") {
            site.previous = Some(site.screen);
            site.screen = Screen::ImageViewer;
        } else if url.ends_with("/job-search") && site.logged_in {
            site.screen = Screen::Search;
        } else if url.starts_with(CRM_URL) {
            site.screen = if site.logged_in {
                Screen::Dashboard
            } else {
                Screen::Login
            };
        } else {
            return Err(DriverError::Timeout(format!("打开 {}", url)));
        }
        Ok(())
    }

    async fn reload(&self) -> DriverResult<()> {
        self.site().calls.push("reload".to_string());
        Ok(())
    }

    async fn go_back(&self) -> DriverResult<()> {
        let mut site = self.site();
        site.calls.push("go_back".to_string());
        site.screen = match site.previous.take() {
            Some(previous) => previous,
            None if site.screen == Screen::Details => Screen::Results,
            None => site.screen,
        };
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        let site = self.site();
        Ok(match site.screen {
            Screen::Blank => "about:blank".to_string(),
            Screen::Login => format!("{}/login", CRM_URL),
            Screen::Search | Screen::Results => format!("{}/job-search", CRM_URL),
            _ => format!("{}/app", CRM_URL),
        })
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> DriverResult<bool> {
        Ok(true)
    }

    async fn body_text(&self) -> DriverResult<String> {
        let site = self.site();
        Ok(match site.screen {
            Screen::Blank => String::new(),
            Screen::Login => "Please sign in to continue".to_string(),
            Screen::Results if !site.has_rows() => "Service orders - No matching results found".to_string(),
            _ => "Service orders dashboard".to_string(),
        })
    }

    async fn wait_for_visible(&self, target: &Target, _timeout: Duration) -> DriverResult<bool> {
        Ok(self.site().count(target) > 0)
    }

    async fn count(&self, target: &Target) -> DriverResult<usize> {
        let site = self.site();
        let disconnected = site.screen == Screen::Details
            && site.target_element(target) == Some(PageElement::InvoiceLink)
            && site.disconnect_on.is_some()
            && site.disconnect_on == site.current_order;
        if disconnected {
            return Err(DriverError::Disconnected("websocket closed".to_string()));
        }
        Ok(site.count(target))
    }

    async fn texts(&self, locator: &Locator) -> DriverResult<Vec<String>> {
        let site = self.site();
        if site.element(locator) == Some(PageElement::ResultRows) && site.has_rows() {
            let query = site.query.clone().unwrap_or_default();
            return Ok(vec![format!("{} Repair Open 2024-05-01", query)]);
        }
        Ok(Vec::new())
    }

    async fn fill(&self, target: &Target, value: &str) -> DriverResult<()> {
        let mut site = self.site();
        site.require(target)?;
        let element = site.target_element(target);
        site.calls.push(format!("fill {:?}", element));
        if element == Some(PageElement::SearchInput) {
            site.typed = value.to_string();
        }
        Ok(())
    }

    async fn type_text(&self, target: &Target, text: &str, _key_delay: Duration) -> DriverResult<()> {
        let mut site = self.site();
        site.require(target)?;
        site.typed.push_str(text);
        Ok(())
    }

    async fn press_key(&self, target: &Target, key: &str) -> DriverResult<()> {
        let mut site = self.site();
        site.require(target)?;
        if key != "Enter" || site.target_element(target) != Some(PageElement::SearchInput) {
            return Ok(());
        }

        let query = site.typed.clone();
        site.calls.push(format!("search {}", query));
        *site.search_count.entry(query.clone()).or_insert(0) += 1;
        site.query = Some(query.clone());
        site.screen = Screen::Results;

        if let Some((id, token)) = &site.cancel_on {
            if *id == query {
                token.cancel();
            }
        }
        let should_panic = site.panic_on.as_deref() == Some(query.as_str());
        drop(site);
        if should_panic {
            panic!("搜索 {} 时页面脚本崩溃", query);
        }
        Ok(())
    }

    async fn click(&self, target: &Target) -> DriverResult<()> {
        let mut site = self.site();
        site.require(target)?;
        let element = site.target_element(target);
        site.calls.push(format!("click {:?}", element));
        if element == Some(PageElement::LoginButton) {
            if let Some(token) = &site.cancel_on_login {
                token.cancel();
            }
        }
        match element {
            Some(PageElement::LoginButton) if site.login_succeeds => {
                site.logged_in = true;
                site.screen = Screen::Dashboard;
            }
            Some(PageElement::JobSearchLink) => {
                site.screen = Screen::Search;
                site.typed.clear();
            }
            Some(PageElement::RowAction) => {
                site.current_order = site.query.clone();
                site.screen = Screen::Details;
            }
            _ => {}
        }
        Ok(())
    }

    async fn scroll_into_view(&self, target: &Target) -> DriverResult<()> {
        self.site().require(target)
    }

    async fn attribute(&self, target: &Target, name: &str) -> DriverResult<Option<String>> {
        let site = self.site();
        site.require(target)?;
        if name != "src" || site.target_element(target) != Some(PageElement::InvoiceImage) {
            return Ok(None);
        }
        let order = site.current_order.clone().unwrap_or_default();
        Ok(match site.invoice_mode() {
            Some(InvoiceMode::DataImage) => Some(format!(
                "data:image/jpeg;base64,{}",
                STANDARD.encode(format!("jpeg-{}", order))
            )),
            Some(InvoiceMode::RemoteImage) => Some(format!("https://img.crm.test/{}.png", order)),
            _ => None,
        })
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> DriverResult<()> {
        let mut site = self.site();
        let prefix = if self.tab { "tab_screenshot" } else { "screenshot" };
        site.calls
            .push(format!("{} {} full={}", prefix, file_name(path), full_page));
        write_file(path, b"fake-png")
    }

    async fn screenshot_element(&self, target: &Target, path: &Path) -> DriverResult<()> {
        let mut site = self.site();
        site.require(target)?;
        site.calls
            .push(format!("region_screenshot {}", file_name(path)));
        write_file(path, b"fake-region")
    }

    async fn click_for_new_page(&self, target: &Target, _timeout: Duration) -> DriverResult<Self> {
        let mut site = self.site();
        site.require(target)?;
        site.calls.push("click_for_new_page".to_string());
        if site.invoice_mode() == Some(InvoiceMode::NewTab) {
            Ok(FakeDriver {
                site: self.site.clone(),
                tab: true,
            })
        } else {
            Err(DriverError::Timeout("没有打开新标签页".to_string()))
        }
    }

    async fn close(&self) -> DriverResult<()> {
        if self.tab {
            self.site().tabs_closed += 1;
        }
        Ok(())
    }

    async fn cookies(&self) -> DriverResult<Vec<StoredCookie>> {
        let site = self.site();
        if !site.logged_in {
            return Ok(Vec::new());
        }
        Ok(vec![StoredCookie {
            name: SESSION_COOKIE.to_string(),
            value: "token-123".to_string(),
            domain: Some("crm.test".to_string()),
            path: Some("/".to_string()),
            expires: None,
            http_only: true,
            secure: true,
        }])
    }

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> DriverResult<()> {
        let mut site = self.site();
        site.calls.push("set_cookies".to_string());
        if cookies.iter().any(|c| c.name == SESSION_COOKIE) {
            site.logged_in = true;
        }
        Ok(())
    }

    async fn shutdown(&self) -> DriverResult<()> {
        self.site().shutdowns += 1;
        Ok(())
    }
}

/// 创建 `FakeDriver` 的启动器
pub struct FakeLauncher {
    pub site: Arc<Mutex<Site>>,
}

impl FakeLauncher {
    pub fn new(site: Arc<Mutex<Site>>) -> Self {
        Self { site }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    type Driver = FakeDriver;

    async fn launch(&self, _settings: &LaunchSettings) -> DriverResult<FakeDriver> {
        let mut site = self.site.lock().unwrap_or_else(|e| e.into_inner());
        site.calls.push("launch".to_string());
        if site.launch_fails {
            return Err(DriverError::Other("找不到浏览器".to_string()));
        }
        Ok(FakeDriver {
            site: self.site.clone(),
            tab: false,
        })
    }
}

/// 指向临时目录、所有等待清零的配置
pub fn test_config(dir: &Path) -> Config {
    Config {
        crm_url: CRM_URL.to_string(),
        username: "agent".to_string(),
        password: "secret".to_string(),
        download_path: dir.join("invoices"),
        diagnostics_dir: dir.join("diagnostics"),
        log_dir: dir.join("logs"),
        storage_state: Some(dir.join("auth_state.json")),
        wait_time: 0,
        max_retries: 3,
        timing: Timing::immediate(),
        ..Config::default()
    }
}

/// 直接拿到一个已登录、停在搜索页的驱动（流程层测试用）
pub fn driver_on_search_page(site: &Arc<Mutex<Site>>) -> FakeDriver {
    {
        let mut guard = site.lock().unwrap_or_else(|e| e.into_inner());
        guard.logged_in = true;
        guard.screen = Screen::Search;
    }
    FakeDriver {
        site: site.clone(),
        tab: false,
    }
}

pub fn calls(site: &Arc<Mutex<Site>>) -> Vec<String> {
    site.lock().unwrap_or_else(|e| e.into_inner()).calls.clone()
}
