use std::path::PathBuf;

use thiserror::Error;

/// 浏览器能力层错误
///
/// 超时、元素缺失等都属于"局部失败"，由调用方决定是否重试或降级
#[derive(Debug, Error)]
pub enum DriverError {
    /// 等待超时
    #[error("等待超时: {0}")]
    Timeout(String),
    /// 元素不存在
    #[error("元素不存在: {0}")]
    ElementNotFound(String),
    /// 浏览器连接断开
    #[error("浏览器连接断开: {0}")]
    Disconnected(String),
    /// CDP 调用失败
    #[error("CDP 调用失败: {0}")]
    Cdp(String),
    /// 脚本返回值无法解析
    #[error("脚本返回值解析失败: {0}")]
    Decode(#[from] serde_json::Error),
    /// 写文件失败
    #[error("写入文件失败 ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 其他错误
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::ElementNotFound(_))
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DriverError::Io {
            path: path.into(),
            source,
        }
    }
}

// 与浏览器断开相关的 CDP 错误统一映射为 Disconnected
impl From<chromiumoxide::error::CdpError> for DriverError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("channel") || lowered.contains("closed") || lowered.contains("websocket") {
            DriverError::Disconnected(message)
        } else if lowered.contains("timeout") {
            DriverError::Timeout(message)
        } else {
            DriverError::Cdp(message)
        }
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({}): {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("配置文件解析失败 ({}): {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// 必填项缺失
    #[error("缺少必填配置项: {0}")]
    MissingField(&'static str),
    /// 配置值非法
    #[error("配置项 {field} 非法: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 订单列表加载错误
#[derive(Debug, Error)]
pub enum InputError {
    /// 文件不存在
    #[error("订单列表文件不存在: {}", .0.display())]
    NotFound(PathBuf),
    /// 文件格式错误
    #[error("订单列表格式错误 ({}): {reason}", .path.display())]
    Format { path: PathBuf, reason: String },
    /// 没有任何订单号
    #[error("订单列表中没有任何订单号: {}", .0.display())]
    Empty(PathBuf),
    /// 读取失败
    #[error("读取订单列表失败 ({}): {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 启动阶段错误（配置或输入无效），整个运行直接终止
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("无法创建输出目录 ({}): {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 登录错误，整个运行直接终止
#[derive(Debug, Error)]
pub enum LoginError {
    /// 浏览器启动失败
    #[error("浏览器启动失败: {0}")]
    Launch(#[source] DriverError),
    /// 打开 CRM 首页失败
    #[error("无法打开 CRM 页面 {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: DriverError,
    },
    /// 所有登录尝试均失败
    #[error("登录失败，已尝试 {attempts} 次")]
    AttemptsExhausted { attempts: u32 },
    /// 登录等待期间收到取消请求
    #[error("登录已取消")]
    Cancelled,
}

/// 无法进入订单搜索页，整个运行直接终止
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("无法打开搜索菜单 ({step}): {source}")]
    Menu {
        step: &'static str,
        #[source]
        source: DriverError,
    },
    #[error("运行已取消")]
    Cancelled,
}

/// 单个订单处理错误，只影响当前订单，可重试
#[derive(Debug, Error)]
pub enum OrderError {
    /// 搜索步骤失败
    #[error("搜索失败: {0}")]
    Search(String),
    /// 搜索结果中找不到订单
    #[error("未找到订单: {0}")]
    NotFound(String),
    /// 无法打开订单详情
    #[error("打开详情失败: {0}")]
    DetailsOpen(String),
    /// 所有发票抓取策略都失败
    #[error("所有发票抓取策略均失败")]
    Extraction,
    /// 浏览器层面的意外故障
    #[error("严重错误: {0}")]
    Critical(#[from] DriverError),
    /// 运行被取消
    #[error("运行已取消")]
    Cancelled,
}

impl OrderError {
    /// 失败发生在哪一步（用于日志）
    pub fn step(&self) -> &'static str {
        match self {
            OrderError::Search(_) => "search",
            OrderError::NotFound(_) => "verify",
            OrderError::DetailsOpen(_) => "open_details",
            OrderError::Extraction => "extract",
            OrderError::Critical(_) => "critical",
            OrderError::Cancelled => "cancelled",
        }
    }
}

/// 整个运行级别的致命错误
#[derive(Debug, Error)]
pub enum RunError {
    #[error("启动失败: {0}")]
    Setup(#[from] SetupError),
    #[error("登录失败: {0}")]
    Login(#[from] LoginError),
    #[error("导航失败: {0}")]
    Navigation(#[from] NavigationError),
    #[error("运行过程中发生意外故障: {0}")]
    Panicked(String),
}
