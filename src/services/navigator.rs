//! 页面导航 - 业务能力层
//!
//! 进入订单搜索页（两级菜单），以及每个订单处理完后回到搜索页

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{DriverError, NavigationError};
use crate::infrastructure::{DriverResult, PageDriver};
use crate::locators::{LocatorTable, PageElement};
use crate::services::diagnostics::Diagnostics;
use crate::utils::{ms, pause};

pub struct Navigator {
    config: Arc<Config>,
    locators: Arc<LocatorTable>,
    diagnostics: Diagnostics,
    cancel: CancellationToken,
}

impl Navigator {
    pub fn new(config: Arc<Config>, locators: Arc<LocatorTable>, cancel: CancellationToken) -> Self {
        let diagnostics = Diagnostics::new(config.diagnostics_dir.clone());
        Self {
            config,
            locators,
            diagnostics,
            cancel,
        }
    }

    /// 通过菜单进入订单搜索页
    ///
    /// 菜单点击失败是致命错误；搜索框没出现只记警告
    pub async fn go_to_search_page<D: PageDriver>(&self, driver: &D) -> Result<(), NavigationError> {
        if self.cancel.is_cancelled() {
            return Err(NavigationError::Cancelled);
        }
        info!("🧭 正在进入订单搜索页...");
        let timing = &self.config.timing;

        if let Err(e) = self.click_menu(driver, PageElement::JobSearchMenu).await {
            return Err(self.menu_failed(driver, "job_search_menu", e).await);
        }
        if !pause(&self.cancel, ms(timing.menu_expand_delay_ms)).await {
            return Err(NavigationError::Cancelled);
        }
        if let Err(e) = self.click_menu(driver, PageElement::JobSearchLink).await {
            return Err(self.menu_failed(driver, "job_search_link", e).await);
        }

        self.settle(driver, timing.navigation_grace_ms).await;
        if self.cancel.is_cancelled() {
            return Err(NavigationError::Cancelled);
        }

        if self.wait_for_search_input(driver).await {
            info!("✓ 已进入订单搜索页");
        } else {
            warn!("⚠️ 未找到搜索框，继续执行");
        }
        Ok(())
    }

    /// 订单处理完后回到搜索页
    ///
    /// 依次尝试：点击菜单链接 → 浏览器后退 → 直接打开搜索页地址
    pub async fn return_to_search<D: PageDriver>(&self, driver: &D) -> bool {
        let grace = self.config.timing.return_grace_ms;

        match driver
            .click(&self.locators.target(PageElement::JobSearchLink))
            .await
        {
            Ok(()) => {
                self.settle(driver, grace).await;
                if self.search_input_present(driver).await {
                    debug!("✓ 通过菜单返回搜索页");
                    return true;
                }
                warn!("⚠️ 点击菜单后未找到搜索框，尝试后退...");
            }
            Err(e) => warn!("⚠️ 点击菜单返回失败: {}，尝试后退...", e),
        }

        match driver.go_back().await {
            Ok(()) => {
                self.settle(driver, grace).await;
                if self.search_input_present(driver).await {
                    debug!("✓ 通过后退返回搜索页");
                    return true;
                }
                warn!("⚠️ 后退后未找到搜索框，直接打开搜索页...");
            }
            Err(e) => warn!("⚠️ 后退失败: {}，直接打开搜索页...", e),
        }

        let url = self.config.search_url();
        match driver.goto(&url).await {
            Ok(()) => {
                self.settle(driver, grace).await;
                debug!("✓ 已打开搜索页: {}", url);
                true
            }
            Err(e) => {
                error!("❌ 无法返回搜索页 {}: {}", url, e);
                false
            }
        }
    }

    /// 搜索框不在当前页面时重新回到搜索页
    pub async fn ensure_search_surface<D: PageDriver>(&self, driver: &D) -> bool {
        if self.search_input_present(driver).await {
            return true;
        }
        info!("🔄 搜索框不在当前页面，重新进入搜索页...");
        self.return_to_search(driver).await
    }

    async fn click_menu<D: PageDriver>(&self, driver: &D, element: PageElement) -> DriverResult<()> {
        let target = self.locators.target(element);
        if !driver
            .wait_for_visible(&target, ms(self.config.timing.selector_timeout_ms))
            .await?
        {
            return Err(DriverError::ElementNotFound(target.describe()));
        }
        driver.click(&target).await
    }

    async fn menu_failed<D: PageDriver>(
        &self,
        driver: &D,
        step: &'static str,
        source: DriverError,
    ) -> NavigationError {
        error!("❌ 进入搜索页失败 ({}): {}", step, source);
        self.diagnostics.capture(driver, "navigation_error.png").await;
        NavigationError::Menu { step, source }
    }

    /// 等待网络空闲后再固定等待一段时间
    async fn settle<D: PageDriver>(&self, driver: &D, grace_ms: u64) {
        if let Err(e) = driver
            .wait_for_network_idle(ms(self.config.timing.network_idle_timeout_ms))
            .await
        {
            debug!("等待网络空闲出错: {}", e);
        }
        pause(&self.cancel, ms(grace_ms)).await;
    }

    async fn wait_for_search_input<D: PageDriver>(&self, driver: &D) -> bool {
        driver
            .wait_for_visible(
                &self.locators.target(PageElement::SearchInput),
                ms(self.config.timing.selector_timeout_ms),
            )
            .await
            .unwrap_or(false)
    }

    async fn search_input_present<D: PageDriver>(&self, driver: &D) -> bool {
        driver
            .count(&self.locators.target(PageElement::SearchInput))
            .await
            .map(|n| n > 0)
            .unwrap_or(false)
    }
}
