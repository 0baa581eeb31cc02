//! 编排层（Orchestration Layer）
//!
//! ## 层次关系
//!
//! ```text
//! run_coordinator (处理 Vec<OrderId>，持有会话)
//!     ↓
//! workflow::OrderFlow (处理单个订单，负责重试)
//!     ↓
//! services (能力层：session / navigator / order_search / artifact)
//!     ↓
//! infrastructure (基础设施：PageDriver)
//! ```
//!
//! 只有编排层持有浏览器会话；只做调度和统计，不做具体业务判断。

pub mod run_coordinator;

pub use run_coordinator::{RunReport, Runner};
