//! 基础设施层（Infrastructure Layer）
//!
//! 持有稀缺资源（Browser / Page），只向上暴露浏览器能力。
//! 上层只依赖 `PageDriver` / `BrowserLauncher` 两个 trait。

pub mod chromium_driver;
pub mod driver;

pub use chromium_driver::ChromiumDriver;
pub use driver::{BrowserLauncher, DriverResult, LaunchSettings, PageDriver, StoredCookie, Target};
