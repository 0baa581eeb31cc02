//! 页面元素定位表
//!
//! 流程代码只认识语义化的元素名（`PageElement`），具体的 XPath / CSS
//! 表达式全部集中在这里。需要适配新的页面结构时，只需改这张表，
//! 或在配置文件的 `[locators]` 中按 key 覆盖。

use std::collections::HashMap;
use std::fmt;

use phf::phf_map;

use crate::error::ConfigError;
use crate::infrastructure::Target;

/// 默认定位表：语义名 -> 定位表达式
static DEFAULT_LOCATORS: phf::Map<&'static str, &'static str> = phf_map! {
    // 登录页
    "username" => "xpath=/html/body/div/form/div[2]/input",
    "password" => "xpath=/html/body/div/form/div[3]/input",
    "login_button" => "xpath=/html/body/div/form/div[3]/button",
    // 登录后的页面骨架
    "logout_button" => "xpath=/html/body/div/div/div[1]/div[2]/ul/li[10]/a",
    "dashboard_shell" => "css=div.dashboard, nav, header, .main-content, .sidebar, .menu, #navbar, .top-bar",
    "profile_name" => "css=.user-name, .profile-name",
    // 两级菜单：先展开父菜单，再点击子链接
    "job_search_menu" => "xpath=/html/body/div[1]/div/div[1]/div[2]/ul/li[4]",
    "job_search_link" => "xpath=/html/body/div[1]/div/div[1]/div[2]/ul/ul[3]/a/li",
    // 搜索页
    "search_input" => "xpath=/html/body/div/div/div[2]/form[2]/div/div/div[2]/label/input",
    "table_rows" => "xpath=/html/body/div/div/div[2]/form[2]/div/div/table/tbody/tr",
    // 行内操作按钮（相对于结果行）
    "row_action" => "xpath=./td[16]/div/a/i",
    "row_action_fallback" => "css=td:last-child i, td:last-child a, td:last-child button",
    // 详情页
    "invoice_link" => "xpath=/html/body/div/div/div[2]/form/div[1]/div[2]/div[2]/table/tbody/tr[8]/td[2]/a",
    "invoice_image" => "xpath=/html/body/div/div/div[2]/form/div[1]/div[2]/div[2]/table/tbody/tr[8]/td[2]/a//img",
};

/// 语义化的页面元素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageElement {
    Username,
    Password,
    LoginButton,
    /// 已登录标志（退出按钮）
    LogoutButton,
    DashboardShell,
    ProfileName,
    JobSearchMenu,
    JobSearchLink,
    SearchInput,
    ResultRows,
    RowAction,
    RowActionFallback,
    InvoiceLink,
    InvoiceImage,
}

impl PageElement {
    pub const ALL: [PageElement; 14] = [
        PageElement::Username,
        PageElement::Password,
        PageElement::LoginButton,
        PageElement::LogoutButton,
        PageElement::DashboardShell,
        PageElement::ProfileName,
        PageElement::JobSearchMenu,
        PageElement::JobSearchLink,
        PageElement::SearchInput,
        PageElement::ResultRows,
        PageElement::RowAction,
        PageElement::RowActionFallback,
        PageElement::InvoiceLink,
        PageElement::InvoiceImage,
    ];

    /// 定位表中的 key
    pub fn key(self) -> &'static str {
        match self {
            PageElement::Username => "username",
            PageElement::Password => "password",
            PageElement::LoginButton => "login_button",
            PageElement::LogoutButton => "logout_button",
            PageElement::DashboardShell => "dashboard_shell",
            PageElement::ProfileName => "profile_name",
            PageElement::JobSearchMenu => "job_search_menu",
            PageElement::JobSearchLink => "job_search_link",
            PageElement::SearchInput => "search_input",
            PageElement::ResultRows => "table_rows",
            PageElement::RowAction => "row_action",
            PageElement::RowActionFallback => "row_action_fallback",
            PageElement::InvoiceLink => "invoice_link",
            PageElement::InvoiceImage => "invoice_image",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.key() == key)
    }
}

/// 定位表达式
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    XPath(String),
    Css(String),
}

impl Locator {
    /// 解析 `xpath=...` / `css=...` 形式的表达式
    ///
    /// 没有前缀时，以 `/`、`./` 或 `(` 开头的按 XPath 处理，其余按 CSS 处理
    pub fn parse(expr: &str) -> Self {
        let expr = expr.trim();
        if let Some(rest) = expr.strip_prefix("xpath=") {
            Locator::XPath(rest.trim().to_string())
        } else if let Some(rest) = expr.strip_prefix("css=") {
            Locator::Css(rest.trim().to_string())
        } else if expr.starts_with('/') || expr.starts_with("./") || expr.starts_with('(') {
            Locator::XPath(expr.to_string())
        } else {
            Locator::Css(expr.to_string())
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Locator::XPath(_) => "xpath",
            Locator::Css(_) => "css",
        }
    }

    pub fn expression(&self) -> &str {
        match self {
            Locator::XPath(e) | Locator::Css(e) => e,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind(), self.expression())
    }
}

/// 定位表（默认表 + 配置覆盖）
#[derive(Debug, Clone, Default)]
pub struct LocatorTable {
    overrides: HashMap<PageElement, Locator>,
}

impl LocatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用配置中的 `[locators]` 覆盖默认表
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut table = Self::new();
        for (key, expr) in overrides {
            let element = PageElement::from_key(key).ok_or_else(|| ConfigError::InvalidValue {
                field: format!("locators.{}", key),
                reason: "未知的页面元素".to_string(),
            })?;
            let locator = Locator::parse(expr);
            if locator.expression().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("locators.{}", key),
                    reason: "定位表达式为空".to_string(),
                });
            }
            table.overrides.insert(element, locator);
        }
        Ok(table)
    }

    pub fn get(&self, element: PageElement) -> Locator {
        if let Some(locator) = self.overrides.get(&element) {
            return locator.clone();
        }
        Locator::parse(DEFAULT_LOCATORS.get(element.key()).copied().unwrap_or_default())
    }

    /// 页面上第一个匹配元素
    pub fn target(&self, element: PageElement) -> Target {
        Target::Element(self.get(element))
    }

    /// 第 `index` 个结果行内的元素
    pub fn row_target(&self, index: usize, element: PageElement) -> Target {
        Target::in_row(self.get(PageElement::ResultRows), index, self.get(element))
    }

    /// 反查：这个定位表达式对应哪个语义元素
    pub fn element_of(&self, locator: &Locator) -> Option<PageElement> {
        PageElement::ALL
            .into_iter()
            .find(|element| &self.get(*element) == locator)
    }
}
