//! 订单处理流程 - 流程层
//!
//! 核心职责：定义"一个订单"的完整处理流程
//!
//! 流程顺序：
//! 1. 搜索订单号
//! 2. 确认搜索结果
//! 3. 打开详情
//! 4. 抓取发票（多种方式依次尝试）
//!
//! 任何一步失败都会结束本次尝试；还有剩余次数时等待后从第 1 步重新开始。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::OrderError;
use crate::infrastructure::PageDriver;
use crate::locators::LocatorTable;
use crate::models::{OrderOutcome, StepOutcome};
use crate::services::{ArtifactExtractor, Capture, Diagnostics, Navigator, OrderSearch};
use crate::utils::{ms, pause};
use crate::workflow::order_ctx::OrderCtx;

/// 订单处理流程
///
/// - 决定步骤顺序、重试次数和退避
/// - 不持有浏览器资源
/// - 只依赖业务能力（services）
pub struct OrderFlow {
    config: Arc<Config>,
    search: OrderSearch,
    extractor: ArtifactExtractor,
    navigator: Navigator,
    diagnostics: Diagnostics,
    cancel: CancellationToken,
}

impl OrderFlow {
    pub fn new(config: Arc<Config>, locators: Arc<LocatorTable>, cancel: CancellationToken) -> Self {
        Self {
            search: OrderSearch::new(config.clone(), locators.clone(), cancel.clone()),
            extractor: ArtifactExtractor::new(config.clone(), locators.clone(), cancel.clone()),
            navigator: Navigator::new(config.clone(), locators, cancel.clone()),
            diagnostics: Diagnostics::new(config.diagnostics_dir.clone()),
            config,
            cancel,
        }
    }

    /// 处理单个订单，返回最终结果
    ///
    /// 被取消时返回 `Skipped`
    pub async fn process_order<D: PageDriver>(&self, driver: &D, ctx: &OrderCtx) -> OrderOutcome {
        let attempts = self.config.attempts();
        let mut last_error: Option<OrderError> = None;

        for attempt in 0..attempts {
            if self.cancel.is_cancelled() {
                warn!("{} ⏹️ 已取消", ctx);
                return OrderOutcome::Skipped;
            }
            info!("{} 🔍 开始处理 (第 {}/{} 次尝试)", ctx, attempt + 1, attempts);

            if attempt > 0 && !self.navigator.ensure_search_surface(driver).await {
                warn!("{} ⚠️ 未能回到搜索页，仍然继续尝试", ctx);
            }

            match self.attempt(driver, ctx).await {
                Ok(capture) => {
                    info!("{} ✅ 处理成功 ({})", ctx, capture.strategy);
                    return OrderOutcome::Success(capture.path);
                }
                Err(OrderError::Cancelled) => {
                    warn!("{} ⏹️ 处理中收到取消请求", ctx);
                    return OrderOutcome::Skipped;
                }
                Err(e) => {
                    warn!(
                        "{} ⚠️ 第 {} 次尝试失败 [{}]: {}",
                        ctx,
                        attempt + 1,
                        e.step(),
                        e
                    );
                    if matches!(e, OrderError::Critical(_)) {
                        error!("{} ❌ 严重错误: {}", ctx, e);
                        self.diagnostics
                            .capture(driver, &format!("critical_error_{}.png", ctx.order_id))
                            .await;
                    }
                    last_error = Some(e);

                    if self.cancel.is_cancelled() {
                        return OrderOutcome::Skipped;
                    }
                    if attempt + 1 < attempts {
                        info!(
                            "{} 🔄 {} 毫秒后重试...",
                            ctx, self.config.timing.retry_backoff_ms
                        );
                        if !pause(&self.cancel, ms(self.config.timing.retry_backoff_ms)).await {
                            return OrderOutcome::Skipped;
                        }
                    }
                }
            }
        }

        let reason = match last_error {
            Some(e) => format!("[{}] {}", e.step(), e),
            None => "未执行任何尝试".to_string(),
        };
        error!("{} ❌ 处理失败: {}", ctx, reason);
        OrderOutcome::Failed(reason)
    }

    /// 一次完整尝试：搜索 → 确认 → 详情 → 抓取
    async fn attempt<D: PageDriver>(&self, driver: &D, ctx: &OrderCtx) -> Result<Capture, OrderError> {
        let order_id = &ctx.order_id;

        // ========== 步骤 1: 搜索 ==========
        self.gate()?;
        match self.search.search(driver, order_id).await? {
            StepOutcome::Ok => {}
            other => return Err(OrderError::Search(other.reason())),
        }

        // ========== 步骤 2: 确认结果 ==========
        self.gate()?;
        match self.search.verify(driver, order_id).await? {
            StepOutcome::Ok => info!("{} ✓ 找到订单", ctx),
            other => return Err(OrderError::NotFound(other.reason())),
        }

        // ========== 步骤 3: 打开详情 ==========
        self.gate()?;
        match self.search.open_details(driver, order_id).await? {
            StepOutcome::Ok => info!("{} ✓ 已打开详情", ctx),
            other => return Err(OrderError::DetailsOpen(other.reason())),
        }

        // ========== 步骤 4: 抓取发票 ==========
        self.gate()?;
        self.extractor
            .extract(driver, order_id)
            .await?
            .ok_or(OrderError::Extraction)
    }

    fn gate(&self) -> Result<(), OrderError> {
        if self.cancel.is_cancelled() {
            Err(OrderError::Cancelled)
        } else {
            Ok(())
        }
    }
}
