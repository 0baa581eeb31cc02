//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，只处理单个订单或单个页面，
//! 不关心流程顺序和重试。

pub mod artifact;
pub mod diagnostics;
pub mod failure_log;
pub mod navigator;
pub mod order_search;
pub mod session;

pub use artifact::{ArtifactExtractor, Capture, Strategy};
pub use diagnostics::Diagnostics;
pub use failure_log::FailureLog;
pub use navigator::Navigator;
pub use order_search::OrderSearch;
pub use session::{SessionHandle, SessionManager, LOGIN_ATTEMPTS};
