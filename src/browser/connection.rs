use std::time::Duration;

use chromiumoxide::Browser;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::browser::launcher::{prepare_page, spawn_handler};
use crate::error::DriverError;
use crate::infrastructure::{ChromiumDriver, DriverResult, LaunchSettings};

/// 连接到已打开的浏览器（需以 `--remote-debugging-port` 启动），并新建一个工作页面
///
/// 结束时只关闭这个页面，不关闭浏览器本身
pub async fn connect_to_browser(port: u16, settings: &LaunchSettings) -> DriverResult<ChromiumDriver> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);

    let (browser, handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        DriverError::from(e)
    })?;
    debug!("浏览器连接成功");
    let handler_task = spawn_handler(handler);

    // 添加短暂延迟以等待浏览器状态同步
    sleep(Duration::from_millis(300)).await;

    let pages = browser.pages().await?;
    debug!("浏览器中已有 {} 个页面", pages.len());

    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建新页面失败: {}", e);
        DriverError::from(e)
    })?;
    prepare_page(&page, settings).await?;

    info!("✓ 已连接到浏览器 (端口 {})", port);
    Ok(ChromiumDriver::new(
        browser,
        page,
        handler_task,
        false,
        settings.navigation_timeout,
    ))
}
