use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::browser::connection::connect_to_browser;
use crate::error::DriverError;
use crate::infrastructure::{BrowserLauncher, ChromiumDriver, DriverResult, LaunchSettings};

/// 生产环境的浏览器启动器
///
/// 配置了调试端口时连接已打开的浏览器，否则自行启动 Chromium
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    type Driver = ChromiumDriver;

    async fn launch(&self, settings: &LaunchSettings) -> DriverResult<ChromiumDriver> {
        match settings.debug_port {
            Some(port) => connect_to_browser(port, settings).await,
            None => launch_browser(settings).await,
        }
    }
}

/// 启动浏览器并打开一个空白页面
pub async fn launch_browser(settings: &LaunchSettings) -> DriverResult<ChromiumDriver> {
    let (width, height) = settings.viewport;
    info!(
        "🚀 启动浏览器 (headless: {}, 窗口: {}x{})",
        settings.headless, width, height
    );

    let mut builder = BrowserConfig::builder()
        .window_size(width, height)
        .request_timeout(settings.navigation_timeout)
        .args(vec![
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-blink-features=AutomationControlled",
        ]);
    builder = if settings.headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };
    if let Some(path) = &settings.chrome_executable {
        debug!("使用浏览器: {}", path.display());
        builder = builder.chrome_executable(path);
    }

    let config = builder.build().map_err(|e| {
        error!("配置浏览器失败: {}", e);
        DriverError::Other(format!("配置浏览器失败: {}", e))
    })?;

    let (browser, handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动浏览器失败: {}", e);
        DriverError::from(e)
    })?;
    let handler_task = spawn_handler(handler);

    // 等待浏览器状态同步
    sleep(Duration::from_millis(300)).await;

    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建页面失败: {}", e);
        DriverError::from(e)
    })?;
    prepare_page(&page, settings).await?;

    info!("✅ 浏览器已启动");
    Ok(ChromiumDriver::new(
        browser,
        page,
        handler_task,
        true,
        settings.navigation_timeout,
    ))
}

/// 在后台处理浏览器事件
pub(crate) fn spawn_handler(mut handler: chromiumoxide::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    })
}

/// 页面初始化：视口、UA、下载目录
pub(crate) async fn prepare_page(page: &Page, settings: &LaunchSettings) -> DriverResult<()> {
    let (width, height) = settings.viewport;
    let metrics = SetDeviceMetricsOverrideParams::builder()
        .width(i64::from(width))
        .height(i64::from(height))
        .device_scale_factor(1.0)
        .mobile(false)
        .build()
        .map_err(|e| DriverError::Other(format!("视口参数无效: {}", e)))?;
    page.execute(metrics).await?;

    page.execute(SetUserAgentOverrideParams::new(settings.user_agent.clone()))
        .await?;

    if let Err(e) = tokio::fs::create_dir_all(&settings.download_dir).await {
        warn!("⚠️ 无法创建下载目录 {}: {}", settings.download_dir.display(), e);
    }
    let download_dir = std::fs::canonicalize(&settings.download_dir)
        .unwrap_or_else(|_| settings.download_dir.clone());
    let downloads = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::Allow)
        .download_path(download_dir.to_string_lossy().to_string())
        .build();
    match downloads {
        Ok(params) => {
            if let Err(e) = page.execute(params).await {
                warn!("⚠️ 设置下载目录失败: {}", e);
            }
        }
        Err(e) => warn!("⚠️ 下载参数无效: {}", e),
    }

    debug!("页面初始化完成: {}x{}", width, height);
    Ok(())
}
