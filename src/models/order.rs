use std::fmt::Display;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 订单号（Service Order）
///
/// 构造时去掉首尾空白，空字符串不是合法订单号
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderId(String);

impl OrderId {
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrderId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value).ok_or_else(|| "订单号不能为空".to_string())
    }
}

impl From<OrderId> for String {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 单个订单的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    /// 发票已保存
    Success(PathBuf),
    /// 重试用尽后仍失败
    Failed(String),
    /// 未处理（取消或运行中止）
    Skipped,
}

impl OrderOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OrderOutcome::Success(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, OrderOutcome::Failed(_))
    }
}

/// 单个步骤的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    /// 目标不存在（例如搜索无结果）
    NotFound,
    /// 等待超时
    TimedOut,
    Failed(String),
}

impl StepOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok)
    }

    /// 用于日志的简短描述
    pub fn reason(&self) -> String {
        match self {
            StepOutcome::Ok => "ok".to_string(),
            StepOutcome::NotFound => "not found".to_string(),
            StepOutcome::TimedOut => "timed out".to_string(),
            StepOutcome::Failed(reason) => reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_is_trimmed() {
        let id = OrderId::new("  SO001 \t").unwrap();
        assert_eq!(id.as_str(), "SO001");
        assert_eq!(id.to_string(), "SO001");
        assert!(OrderId::new("   ").is_none());
        assert!(OrderId::new("").is_none());
    }

    #[test]
    fn test_order_id_deserialize_rejects_blank() {
        #[derive(Deserialize)]
        struct List {
            orders: Vec<OrderId>,
        }
        let list: List = toml::from_str(r#"orders = [" SO1 ", "SO2"]"#).unwrap();
        assert_eq!(list.orders[0].as_str(), "SO1");
        assert!(toml::from_str::<List>(r#"orders = ["  "]"#).is_err());
    }

    #[test]
    fn test_step_outcome_reason() {
        assert!(StepOutcome::Ok.is_ok());
        assert_eq!(StepOutcome::TimedOut.reason(), "timed out");
        assert_eq!(StepOutcome::Failed("x".into()).reason(), "x");
    }
}
