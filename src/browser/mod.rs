//! 浏览器启动与连接

pub mod connection;
pub mod launcher;

pub use connection::connect_to_browser;
pub use launcher::{launch_browser, ChromiumLauncher};
