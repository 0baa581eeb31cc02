//! # CRM Invoice Fetch
//!
//! 从 CRM 系统中按 Service Order 批量抓取发票图片
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Browser / Page），只暴露能力
//! - `PageDriver` - 页面能力接口，`ChromiumDriver` 为 chromiumoxide 实现
//! - `locators` - 页面元素定位表
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个订单
//! - `SessionManager` - 登录与登录状态复用
//! - `Navigator` - 进入 / 返回搜索页
//! - `OrderSearch` - 搜索、确认、打开详情
//! - `ArtifactExtractor` - 发票抓取（多种方式依次尝试）
//! - `FailureLog` - 写 failed_orders.txt
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个订单"的完整处理流程
//! - `OrderCtx` - 上下文封装（订单号 + 序号）
//! - `OrderFlow` - 流程编排与重试（search → verify → details → extract）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/run_coordinator` - 会话管理、顺序处理、取消、统计与汇总

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod locators;
pub mod logger;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::ChromiumLauncher;
pub use config::Config;
pub use error::{DriverError, LoginError, NavigationError, OrderError, RunError, SetupError};
pub use infrastructure::{BrowserLauncher, ChromiumDriver, PageDriver};
pub use models::{OrderId, OrderOutcome, RunProgress, RunStatistics};
pub use orchestrator::{RunReport, Runner};
pub use workflow::{OrderCtx, OrderFlow};
