//! 浏览器能力接口 - 基础设施层
//!
//! 流程代码只依赖这里的 trait，不直接接触 chromiumoxide。
//! 所有等待都有明确的上限，超时以 `Ok(false)` 或 `DriverError::Timeout` 的
//! 形式返回给调用方，由调用方决定重试或降级。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::locators::Locator;

pub type DriverResult<T> = Result<T, DriverError>;

/// 要操作的元素
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// 页面上第一个匹配的元素
    Element(Locator),
    /// 第 `index` 个结果行内的子元素
    InRow {
        rows: Locator,
        index: usize,
        child: Locator,
    },
}

impl Target {
    pub fn in_row(rows: Locator, index: usize, child: Locator) -> Self {
        Target::InRow { rows, index, child }
    }

    pub fn describe(&self) -> String {
        match self {
            Target::Element(locator) => locator.to_string(),
            Target::InRow { rows, index, child } => {
                format!("{} [行 {}] -> {}", rows, index, child)
            }
        }
    }
}

impl From<Locator> for Target {
    fn from(locator: Locator) -> Self {
        Target::Element(locator)
    }
}

/// 持久化的 cookie（登录状态文件的内容）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

impl StoredCookie {
    /// 是否在 `now`（Unix 秒）之前已过期；会话 cookie 永不过期
    pub fn is_expired_at(&self, now: f64) -> bool {
        matches!(self.expires, Some(expires) if expires > 0.0 && expires <= now)
    }
}

/// 浏览器启动参数
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub headless: bool,
    pub viewport: (u32, u32),
    pub user_agent: String,
    /// 下载目录
    pub download_dir: PathBuf,
    /// 有值时连接已打开的浏览器
    pub debug_port: Option<u16>,
    pub chrome_executable: Option<PathBuf>,
    pub navigation_timeout: Duration,
}

/// 单个页面（标签页）的自动化能力
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> DriverResult<()>;

    async fn reload(&self) -> DriverResult<()>;

    /// 浏览器历史后退
    async fn go_back(&self) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<String>;

    /// 等待网络空闲；超时返回 `Ok(false)`
    async fn wait_for_network_idle(&self, timeout: Duration) -> DriverResult<bool>;

    /// `body` 的可见文本
    async fn body_text(&self) -> DriverResult<String>;

    /// 等待元素可见；超时返回 `Ok(false)`
    async fn wait_for_visible(&self, target: &Target, timeout: Duration) -> DriverResult<bool>;

    /// 当前匹配的元素个数（不等待）
    async fn count(&self, target: &Target) -> DriverResult<usize>;

    /// 所有匹配元素的文本
    async fn texts(&self, locator: &Locator) -> DriverResult<Vec<String>>;

    /// 直接设置输入框的值（会触发 input/change 事件）
    async fn fill(&self, target: &Target, value: &str) -> DriverResult<()>;

    /// 逐键输入，每个字符之间间隔 `key_delay`
    async fn type_text(&self, target: &Target, text: &str, key_delay: Duration) -> DriverResult<()>;

    async fn press_key(&self, target: &Target, key: &str) -> DriverResult<()>;

    async fn click(&self, target: &Target) -> DriverResult<()>;

    async fn scroll_into_view(&self, target: &Target) -> DriverResult<()>;

    async fn attribute(&self, target: &Target, name: &str) -> DriverResult<Option<String>>;

    /// 截图保存到 `path`（PNG）
    async fn screenshot(&self, path: &Path, full_page: bool) -> DriverResult<()>;

    /// 只截取元素所在区域
    async fn screenshot_element(&self, target: &Target, path: &Path) -> DriverResult<()>;

    /// 点击元素并拦截由此打开的新标签页
    async fn click_for_new_page(&self, target: &Target, timeout: Duration) -> DriverResult<Self>
    where
        Self: Sized;

    /// 关闭当前标签页
    async fn close(&self) -> DriverResult<()>;

    async fn cookies(&self) -> DriverResult<Vec<StoredCookie>>;

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> DriverResult<()>;

    /// 释放整个浏览器会话
    async fn shutdown(&self) -> DriverResult<()>;
}

/// 创建浏览器会话
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Driver: PageDriver + 'static;

    async fn launch(&self, settings: &LaunchSettings) -> DriverResult<Self::Driver>;
}
