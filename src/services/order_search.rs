//! 订单搜索 - 业务能力层
//!
//! 搜索、确认结果、打开详情三个步骤。每一步返回 `StepOutcome`，
//! 重试和失败处理交给流程层。

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::DriverError;
use crate::infrastructure::{DriverResult, PageDriver};
use crate::locators::{LocatorTable, PageElement};
use crate::models::{OrderId, StepOutcome};
use crate::services::diagnostics::Diagnostics;
use crate::utils::{ms, pause};

static NO_RESULTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)no.*results|not found|no data").unwrap());

pub struct OrderSearch {
    config: Arc<Config>,
    locators: Arc<LocatorTable>,
    diagnostics: Diagnostics,
    cancel: CancellationToken,
}

impl OrderSearch {
    pub fn new(config: Arc<Config>, locators: Arc<LocatorTable>, cancel: CancellationToken) -> Self {
        let diagnostics = Diagnostics::new(config.diagnostics_dir.clone());
        Self {
            config,
            locators,
            diagnostics,
            cancel,
        }
    }

    /// 在搜索框中输入订单号并回车
    ///
    /// 只有浏览器断开会以 `Err` 返回，其余失败都转换为 `StepOutcome`
    pub async fn search<D: PageDriver>(&self, driver: &D, order_id: &OrderId) -> DriverResult<StepOutcome> {
        into_outcome(self.try_search(driver, order_id).await)
    }

    /// 确认搜索结果中有这个订单（行文本包含订单号即可）
    pub async fn verify<D: PageDriver>(&self, driver: &D, order_id: &OrderId) -> DriverResult<StepOutcome> {
        into_outcome(self.try_verify(driver, order_id).await)
    }

    /// 点击订单所在行的查看按钮，进入详情页
    pub async fn open_details<D: PageDriver>(
        &self,
        driver: &D,
        order_id: &OrderId,
    ) -> DriverResult<StepOutcome> {
        let outcome = into_outcome(self.try_open_details(driver, order_id).await);
        if !matches!(outcome, Ok(StepOutcome::Ok)) {
            self.diagnostics
                .capture(driver, &format!("details_error_{}.png", order_id))
                .await;
        }
        outcome
    }

    async fn try_search<D: PageDriver>(&self, driver: &D, order_id: &OrderId) -> DriverResult<StepOutcome> {
        let timing = &self.config.timing;
        let input = self.locators.target(PageElement::SearchInput);

        if !driver
            .wait_for_visible(&input, ms(timing.selector_timeout_ms))
            .await?
        {
            warn!("[订单 {}] 未找到搜索框", order_id);
            return Ok(StepOutcome::Failed("未找到搜索框".to_string()));
        }

        driver.fill(&input, "").await?;
        driver
            .type_text(&input, order_id.as_str(), ms(timing.key_delay_ms))
            .await?;
        driver.press_key(&input, "Enter").await?;

        pause(&self.cancel, ms(timing.search_grace_ms)).await;
        driver
            .wait_for_network_idle(ms(timing.network_idle_timeout_ms))
            .await?;

        debug!("[订单 {}] 已提交搜索", order_id);
        Ok(StepOutcome::Ok)
    }

    async fn try_verify<D: PageDriver>(&self, driver: &D, order_id: &OrderId) -> DriverResult<StepOutcome> {
        let rows = self.locators.target(PageElement::ResultRows);
        let rows_visible = driver
            .wait_for_visible(&rows, ms(self.config.timing.results_timeout_ms))
            .await?;

        if rows_visible && self.row_index(driver, order_id).await?.is_some() {
            debug!("[订单 {}] ✓ 在搜索结果中找到订单", order_id);
            return Ok(StepOutcome::Ok);
        }

        let text = driver.body_text().await?;
        if shows_no_results(&text) {
            debug!("[订单 {}] 页面提示没有结果", order_id);
            return Ok(StepOutcome::NotFound);
        }

        if rows_visible {
            debug!("[订单 {}] 结果中没有这个订单", order_id);
            Ok(StepOutcome::NotFound)
        } else {
            debug!("[订单 {}] 等待结果表格超时", order_id);
            Ok(StepOutcome::TimedOut)
        }
    }

    async fn try_open_details<D: PageDriver>(&self, driver: &D, order_id: &OrderId) -> DriverResult<StepOutcome> {
        let timing = &self.config.timing;

        let Some(index) = self.row_index(driver, order_id).await? else {
            warn!("[订单 {}] 结果中找不到订单所在行", order_id);
            return Ok(StepOutcome::NotFound);
        };

        let primary = self.locators.row_target(index, PageElement::RowAction);
        let action = if driver.count(&primary).await? > 0 {
            primary
        } else {
            let fallback = self.locators.row_target(index, PageElement::RowActionFallback);
            if driver.count(&fallback).await? == 0 {
                warn!("[订单 {}] 未找到查看按钮", order_id);
                return Ok(StepOutcome::NotFound);
            }
            debug!("[订单 {}] 使用备用查看按钮", order_id);
            fallback
        };

        driver.scroll_into_view(&action).await?;
        pause(&self.cancel, ms(timing.scroll_settle_ms)).await;
        driver.click(&action).await?;

        debug!("[订单 {}] 等待详情页 {} 秒...", order_id, self.config.wait_time);
        pause(&self.cancel, ms(self.config.wait_time.saturating_mul(1000))).await;
        driver
            .wait_for_network_idle(ms(timing.network_idle_timeout_ms))
            .await?;

        let invoice = self.locators.target(PageElement::InvoiceLink);
        if !driver
            .wait_for_visible(&invoice, ms(timing.selector_timeout_ms))
            .await?
        {
            debug!("[订单 {}] 发票元素暂未出现，继续", order_id);
        }
        Ok(StepOutcome::Ok)
    }

    /// 文本包含订单号的第一行
    async fn row_index<D: PageDriver>(&self, driver: &D, order_id: &OrderId) -> DriverResult<Option<usize>> {
        let texts = driver
            .texts(&self.locators.get(PageElement::ResultRows))
            .await?;
        Ok(texts
            .iter()
            .position(|text| text.contains(order_id.as_str())))
    }
}

fn into_outcome(result: DriverResult<StepOutcome>) -> DriverResult<StepOutcome> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e @ DriverError::Disconnected(_)) => Err(e),
        Err(DriverError::Timeout(what)) => {
            debug!("等待超时: {}", what);
            Ok(StepOutcome::TimedOut)
        }
        Err(e) => Ok(StepOutcome::Failed(e.to_string())),
    }
}

fn shows_no_results(text: &str) -> bool {
    NO_RESULTS.is_match(text)
}
