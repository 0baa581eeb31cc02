use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::infrastructure::LaunchSettings;
use crate::locators::LocatorTable;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 运行配置
///
/// 运行开始前加载一次，运行期间只读
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CRM 地址
    pub crm_url: String,
    pub username: String,
    pub password: String,
    /// 订单列表文件
    #[serde(alias = "excel_path")]
    pub input_path: Option<PathBuf>,
    /// 发票保存目录
    pub download_path: PathBuf,
    /// 是否无头模式
    pub headless: bool,
    /// 打开详情后的等待秒数
    pub wait_time: u64,
    /// 单个订单最大尝试次数
    pub max_retries: u32,
    pub log_level: String,
    pub log_dir: PathBuf,
    /// 登录状态文件，存在时复用以跳过登录
    pub storage_state: Option<PathBuf>,
    /// 搜索页相对路径（返回搜索页的最后兜底）
    pub search_path: String,
    /// 诊断截图目录
    pub diagnostics_dir: PathBuf,
    /// 连接已打开的浏览器（调试端口），为空时自行启动
    pub browser_debug_port: Option<u16>,
    pub chrome_executable: Option<PathBuf>,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// 各步骤的固定等待时间
    pub timing: Timing,
    /// 定位表覆盖（key 见 `PageElement::key`）
    pub locators: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crm_url: String::new(),
            username: String::new(),
            password: String::new(),
            input_path: None,
            download_path: PathBuf::from("invoices"),
            headless: true,
            wait_time: 5,
            max_retries: 3,
            log_level: "INFO".to_string(),
            log_dir: PathBuf::from("logs"),
            storage_state: Some(PathBuf::from("auth_state.json")),
            search_path: "/job-search".to_string(),
            diagnostics_dir: PathBuf::from("diagnostics"),
            browser_debug_port: None,
            chrome_executable: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport_width: 1920,
            viewport_height: 1080,
            timing: Timing::default(),
            locators: HashMap::new(),
        }
    }
}

/// 各步骤的等待时间（毫秒）
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub navigation_timeout_ms: u64,
    pub network_idle_timeout_ms: u64,
    /// 首页加载后的渲染等待
    pub page_render_grace_ms: u64,
    /// 页面内容过少时的额外等待
    pub thin_content_wait_ms: u64,
    /// 页面"有内容"的最少字符数
    pub min_body_chars: usize,
    pub login_grace_ms: u64,
    pub login_retry_delay_ms: u64,
    pub selector_timeout_ms: u64,
    pub short_selector_timeout_ms: u64,
    pub results_timeout_ms: u64,
    /// 父菜单展开动画
    pub menu_expand_delay_ms: u64,
    pub navigation_grace_ms: u64,
    pub return_grace_ms: u64,
    pub search_grace_ms: u64,
    /// 逐键输入间隔
    pub key_delay_ms: u64,
    pub scroll_settle_ms: u64,
    pub retry_backoff_ms: u64,
    pub new_page_timeout_ms: u64,
    pub new_page_settle_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 60_000,
            network_idle_timeout_ms: 30_000,
            page_render_grace_ms: 5_000,
            thin_content_wait_ms: 3_000,
            min_body_chars: 100,
            login_grace_ms: 5_000,
            login_retry_delay_ms: 3_000,
            selector_timeout_ms: 10_000,
            short_selector_timeout_ms: 5_000,
            results_timeout_ms: 15_000,
            menu_expand_delay_ms: 1_000,
            navigation_grace_ms: 3_000,
            return_grace_ms: 2_000,
            search_grace_ms: 4_000,
            key_delay_ms: 100,
            scroll_settle_ms: 1_000,
            retry_backoff_ms: 3_000,
            new_page_timeout_ms: 30_000,
            new_page_settle_ms: 2_000,
        }
    }
}

impl Timing {
    /// 所有固定等待清零，选择器超时保留一个很小的上限（用于演练和测试）
    pub fn immediate() -> Self {
        Self {
            navigation_timeout_ms: 1_000,
            network_idle_timeout_ms: 10,
            page_render_grace_ms: 0,
            thin_content_wait_ms: 0,
            min_body_chars: 0,
            login_grace_ms: 0,
            login_retry_delay_ms: 0,
            selector_timeout_ms: 10,
            short_selector_timeout_ms: 10,
            results_timeout_ms: 10,
            menu_expand_delay_ms: 0,
            navigation_grace_ms: 0,
            return_grace_ms: 0,
            search_grace_ms: 0,
            key_delay_ms: 0,
            scroll_settle_ms: 0,
            retry_backoff_ms: 0,
            new_page_timeout_ms: 10,
            new_page_settle_ms: 0,
        }
    }
}

impl Config {
    /// 从 TOML 文件加载配置，再叠加环境变量；文件不存在时使用默认值
    ///
    /// 不做校验也不写日志，调用方在初始化日志之后调用 `validate`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Self::default()
        };

        Ok(config.apply_env())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 用环境变量覆盖配置
    pub fn apply_env(self) -> Self {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(self, var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            crm_url: var("CRM_URL").unwrap_or(self.crm_url),
            username: var("CRM_USERNAME").unwrap_or(self.username),
            password: var("CRM_PASSWORD").unwrap_or(self.password),
            headless: parse_var(&var, "CRM_HEADLESS").unwrap_or(self.headless),
            wait_time: parse_var(&var, "CRM_WAIT_TIME").unwrap_or(self.wait_time),
            max_retries: parse_var(&var, "CRM_MAX_RETRIES").unwrap_or(self.max_retries),
            input_path: var("CRM_INPUT_PATH").map(PathBuf::from).or(self.input_path),
            download_path: var("CRM_OUTPUT_DIR").map(PathBuf::from).unwrap_or(self.download_path),
            log_level: var("CRM_LOG_LEVEL").unwrap_or(self.log_level),
            browser_debug_port: parse_var(&var, "BROWSER_DEBUG_PORT").or(self.browser_debug_port),
            ..self
        }
    }

    /// 校验必填项，返回非致命的警告
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if self.crm_url.trim().is_empty() {
            return Err(ConfigError::MissingField("crm_url"));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::MissingField("username"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::MissingField("password"));
        }
        LocatorTable::with_overrides(&self.locators)?;

        let mut warnings = Vec::new();
        if !self.crm_url.starts_with("http://") && !self.crm_url.starts_with("https://") {
            warnings.push("CRM 地址应以 http:// 或 https:// 开头".to_string());
        }
        if self.max_retries == 0 {
            warnings.push("max_retries 为 0，按 1 次尝试处理".to_string());
        }
        Ok(warnings)
    }

    /// 单个订单的尝试次数（至少 1 次）
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn locator_table(&self) -> Result<LocatorTable, ConfigError> {
        LocatorTable::with_overrides(&self.locators)
    }

    /// 搜索页的直接地址
    pub fn search_url(&self) -> String {
        format!("{}{}", self.crm_url.trim_end_matches('/'), self.search_path)
    }

    /// 发票保存路径 `{download_path}/{id}.{ext}`
    pub fn artifact_path(&self, order_id: &str, ext: &str) -> PathBuf {
        self.download_path.join(format!("{}.{}", order_id, ext))
    }

    pub fn failure_log_path(&self) -> PathBuf {
        self.download_path.join("failed_orders.txt")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.download_path.join("automation_summary.txt")
    }

    pub fn diagnostic_path(&self, name: &str) -> PathBuf {
        self.diagnostics_dir.join(name)
    }

    pub fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            headless: self.headless,
            viewport: (self.viewport_width, self.viewport_height),
            user_agent: self.user_agent.clone(),
            download_dir: self.download_path.clone(),
            debug_port: self.browser_debug_port,
            chrome_executable: self.chrome_executable.clone(),
            navigation_timeout: std::time::Duration::from_millis(self.timing.navigation_timeout_ms),
        }
    }
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    var(name).and_then(|v| v.trim().parse().ok())
}
