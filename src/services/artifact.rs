//! 发票抓取 - 业务能力层
//!
//! 按顺序尝试三种方式，第一种成功即停止：
//! 1. 点击发票链接，在新标签页中整页截图
//! 2. 读取内嵌图片的 `src`（base64 直接解码，http 地址打开后截图）
//! 3. 对发票区域截图

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::DriverError;
use crate::infrastructure::{DriverResult, PageDriver};
use crate::locators::{LocatorTable, PageElement};
use crate::models::OrderId;
use crate::services::diagnostics::Diagnostics;
use crate::utils::{ms, pause};

/// 抓取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    NewTab,
    EmbeddedImage,
    RegionScreenshot,
}

impl Strategy {
    /// 尝试顺序
    pub const CHAIN: [Strategy; 3] = [
        Strategy::NewTab,
        Strategy::EmbeddedImage,
        Strategy::RegionScreenshot,
    ];
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::NewTab => "新标签页截图",
            Strategy::EmbeddedImage => "内嵌图片",
            Strategy::RegionScreenshot => "区域截图",
        };
        f.write_str(name)
    }
}

/// 保存下来的发票
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub path: PathBuf,
    pub strategy: Strategy,
}

pub struct ArtifactExtractor {
    config: Arc<Config>,
    locators: Arc<LocatorTable>,
    diagnostics: Diagnostics,
    cancel: CancellationToken,
}

impl ArtifactExtractor {
    pub fn new(config: Arc<Config>, locators: Arc<LocatorTable>, cancel: CancellationToken) -> Self {
        let diagnostics = Diagnostics::new(config.diagnostics_dir.clone());
        Self {
            config,
            locators,
            diagnostics,
            cancel,
        }
    }

    /// 依次尝试各抓取方式；全部失败时保存诊断截图并返回 `Ok(None)`
    ///
    /// 单个方式的普通失败只记录日志，浏览器断开时立即返回错误
    pub async fn extract<D: PageDriver>(
        &self,
        driver: &D,
        order_id: &OrderId,
    ) -> DriverResult<Option<Capture>> {
        let link = self.locators.target(PageElement::InvoiceLink);
        match driver.count(&link).await {
            Ok(0) => {}
            Ok(_) => {
                if let Err(e) = driver.scroll_into_view(&link).await {
                    if matches!(e, DriverError::Disconnected(_)) {
                        return Err(e);
                    }
                    debug!("滚动到发票区域失败: {}", e);
                }
                pause(&self.cancel, ms(self.config.timing.scroll_settle_ms)).await;
            }
            Err(e @ DriverError::Disconnected(_)) => return Err(e),
            Err(e) => debug!("查找发票链接失败: {}", e),
        }

        for strategy in Strategy::CHAIN {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            debug!("[订单 {}] 尝试抓取方式: {}", order_id, strategy);

            let attempt = match strategy {
                Strategy::NewTab => self.capture_new_tab(driver, order_id).await,
                Strategy::EmbeddedImage => self.capture_embedded_image(driver, order_id).await,
                Strategy::RegionScreenshot => self.capture_region(driver, order_id).await,
            };

            match attempt {
                Ok(Some(path)) => {
                    info!(
                        "[订单 {}] ✅ 发票已保存 ({}): {}",
                        order_id,
                        strategy,
                        path.display()
                    );
                    return Ok(Some(Capture { path, strategy }));
                }
                Ok(None) => debug!("[订单 {}] {} 不可用", order_id, strategy),
                Err(e @ DriverError::Disconnected(_)) => {
                    warn!("[订单 {}] ❌ {} 时浏览器断开: {}", order_id, strategy, e);
                    return Err(e);
                }
                Err(e) => warn!("[订单 {}] ⚠️ {} 失败: {}", order_id, strategy, e),
            }
        }

        warn!("[订单 {}] ⚠️ 未能保存发票", order_id);
        self.diagnostics
            .capture(driver, &format!("invoice_error_{}.png", order_id))
            .await;
        Ok(None)
    }

    async fn capture_new_tab<D: PageDriver>(
        &self,
        driver: &D,
        order_id: &OrderId,
    ) -> DriverResult<Option<PathBuf>> {
        let timing = &self.config.timing;
        let link = self.locators.target(PageElement::InvoiceLink);
        if !driver
            .wait_for_visible(&link, ms(timing.selector_timeout_ms))
            .await?
        {
            return Ok(None);
        }

        let tab = driver
            .click_for_new_page(&link, ms(timing.new_page_timeout_ms))
            .await?;
        let path = self.config.artifact_path(order_id.as_str(), "png");

        let shot = match tab
            .wait_for_network_idle(ms(timing.network_idle_timeout_ms))
            .await
        {
            Ok(_) => {
                pause(&self.cancel, ms(timing.new_page_settle_ms)).await;
                tab.screenshot(&path, true).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = tab.close().await {
            debug!("关闭发票标签页失败: {}", e);
        }
        shot?;
        Ok(Some(path))
    }

    async fn capture_embedded_image<D: PageDriver>(
        &self,
        driver: &D,
        order_id: &OrderId,
    ) -> DriverResult<Option<PathBuf>> {
        let image = self.locators.target(PageElement::InvoiceImage);
        if driver.count(&image).await? == 0 {
            return Ok(None);
        }
        let Some(src) = driver.attribute(&image, "src").await? else {
            return Ok(None);
        };
        let src = src.trim();

        if src.starts_with("data:") {
            let (ext, bytes) = decode_data_url(src).map_err(DriverError::Other)?;
            let path = self.config.artifact_path(order_id.as_str(), ext);
            write_artifact(&path, &bytes).await?;
            return Ok(Some(path));
        }

        if src.starts_with("http://") || src.starts_with("https://") {
            let path = self.config.artifact_path(order_id.as_str(), "png");
            driver.goto(src).await?;
            let shot = driver.screenshot(&path, true).await;
            if let Err(e) = driver.go_back().await {
                warn!("⚠️ 从图片页面后退失败: {}", e);
            }
            if let Err(e) = driver
                .wait_for_network_idle(ms(self.config.timing.network_idle_timeout_ms))
                .await
            {
                debug!("等待网络空闲出错: {}", e);
            }
            shot?;
            return Ok(Some(path));
        }

        debug!("无法识别的图片地址: {}", src);
        Ok(None)
    }

    async fn capture_region<D: PageDriver>(
        &self,
        driver: &D,
        order_id: &OrderId,
    ) -> DriverResult<Option<PathBuf>> {
        let link = self.locators.target(PageElement::InvoiceLink);
        if driver.count(&link).await? == 0 {
            return Ok(None);
        }
        let path = self.config.artifact_path(order_id.as_str(), "png");
        driver.screenshot_element(&link, &path).await?;
        Ok(Some(path))
    }
}

/// 解码 `data:` 图片，返回扩展名和内容
///
/// jpeg / jpg 保存为 `jpg`，其他一律 `png`
pub fn decode_data_url(src: &str) -> Result<(&'static str, Vec<u8>), String> {
    let payload = match src.split_once("base64,") {
        Some((_, payload)) => payload,
        None => src,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| format!("base64 解码失败: {}", e))?;

    let ext = if src.starts_with("data:image/jpeg") || src.starts_with("data:image/jpg") {
        "jpg"
    } else {
        "png"
    };
    Ok((ext, bytes))
}

async fn write_artifact(path: &Path, bytes: &[u8]) -> DriverResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DriverError::io(parent, e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| DriverError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_png_data_url() {
        let encoded = STANDARD.encode(b"\x89PNG fake");
        let (ext, bytes) = decode_data_url(&format!("data:image/png;base64,{}", encoded)).unwrap();
        assert_eq!(ext, "png");
        assert_eq!(bytes, b"\x89PNG fake");
    }

    #[test]
    fn test_decode_jpeg_uses_jpg_extension() {
        let encoded = STANDARD.encode(b"jpeg bytes");
        let (ext, _) = decode_data_url(&format!("data:image/jpeg;base64,{}", encoded)).unwrap();
        assert_eq!(ext, "jpg");
        let (ext, _) = decode_data_url(&format!("data:image/jpg;base64,{}", encoded)).unwrap();
        assert_eq!(ext, "jpg");
        let (ext, _) = decode_data_url(&format!("data:image/gif;base64,{}", encoded)).unwrap();
        assert_eq!(ext, "png");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
    }
}
