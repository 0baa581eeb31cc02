//! 运行协调器 - 编排层
//!
//! ## 职责
//!
//! 1. **会话管理**：登录一次，运行结束时释放浏览器（任何退出路径都会释放）
//! 2. **顺序处理**：按输入顺序逐个处理订单，订单之间检查取消请求
//! 3. **失败记录**：最终失败的订单追加到 failed_orders.txt
//! 4. **全局统计**：汇总结果、推送进度、写入 automation_summary.txt
//!
//! 登录失败和无法进入搜索页是致命错误；单个订单的失败不会中止运行。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{LoginError, NavigationError, RunError, SetupError};
use crate::infrastructure::BrowserLauncher;
use crate::models::{load_identifiers, OrderId, OrderOutcome, RunProgress, RunStatistics};
use crate::services::{FailureLog, Navigator, SessionHandle, SessionManager};
use crate::utils::logging::{log_order_start, log_startup, print_final_stats, write_summary};
use crate::workflow::{OrderCtx, OrderFlow};

/// 一次运行的结果
#[derive(Debug)]
pub struct RunReport {
    pub stats: RunStatistics,
    /// 每个已处理订单的结果（按处理顺序）
    pub outcomes: Vec<(OrderId, OrderOutcome)>,
    /// 导致运行提前结束的致命错误
    pub fatal: Option<RunError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
    }
}

/// 运行协调器
pub struct Runner<L: BrowserLauncher> {
    config: Arc<Config>,
    launcher: L,
    cancel: CancellationToken,
    progress: watch::Sender<RunProgress>,
}

impl<L: BrowserLauncher> Runner<L> {
    pub fn new(config: Config, launcher: L) -> Self {
        let (progress, _) = watch::channel(RunProgress::new(RunStatistics::start(0)));
        Self {
            config: Arc::new(config),
            launcher,
            cancel: CancellationToken::new(),
            progress,
        }
    }

    /// 取消令牌，可在任意时刻触发
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        info!("⏹️ 收到取消请求");
        self.cancel.cancel();
    }

    /// 订阅运行进度
    pub fn progress(&self) -> watch::Receiver<RunProgress> {
        self.progress.subscribe()
    }

    /// 从文件加载订单号后运行
    pub async fn run_from_input(&self, path: &Path) -> RunReport {
        match load_identifiers(path).await {
            Ok(ids) => self.run(ids).await,
            Err(e) => {
                error!("❌ 加载订单列表失败: {}", e);
                let mut tally = Tally::new(0);
                self.finalize(&mut tally.stats);
                tally.into_report(Some(RunError::Setup(SetupError::Input(e))))
            }
        }
    }

    /// 处理订单列表
    ///
    /// 无论成功与否，统计都会在返回前完成并写入汇总文件
    pub async fn run(&self, ids: Vec<OrderId>) -> RunReport {
        let mut tally = Tally::new(ids.len());
        self.publish(&tally.stats, None);
        log_startup(&self.config, ids.len());

        let fatal = self.execute(&ids, &mut tally).await.err();
        if let Some(e) = &fatal {
            error!("❌ 运行中止: {}", e);
        }

        self.finalize(&mut tally.stats);
        tally.into_report(fatal)
    }

    async fn execute(&self, ids: &[OrderId], tally: &mut Tally) -> Result<(), RunError> {
        self.prepare_output()?;
        let locators = Arc::new(self.config.locator_table().map_err(SetupError::from)?);

        if ids.is_empty() {
            warn!("⚠️ 没有待处理的订单，程序结束");
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            warn!("⏹️ 运行开始前已取消");
            return Ok(());
        }

        let session = match SessionManager::new(self.config.clone(), locators.clone(), self.cancel.clone())
            .establish(&self.launcher)
            .await
        {
            Ok(session) => session,
            Err(LoginError::Cancelled) => {
                warn!("⏹️ 登录时已取消");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let navigator = Navigator::new(self.config.clone(), locators.clone(), self.cancel.clone());
        match navigator.go_to_search_page(session.driver()).await {
            Ok(()) => {}
            Err(NavigationError::Cancelled) => {
                warn!("⏹️ 进入搜索页时已取消");
                session.release().await;
                return Ok(());
            }
            Err(e) => {
                session.release().await;
                return Err(e.into());
            }
        }

        let flow = OrderFlow::new(self.config.clone(), locators, self.cancel.clone());
        let looped = AssertUnwindSafe(self.process_all(&session, &navigator, &flow, ids, tally))
            .catch_unwind()
            .await;

        session.release().await;
        looped.map_err(|panic| RunError::Panicked(panic_message(panic)))
    }

    /// 按顺序处理所有订单
    async fn process_all(
        &self,
        session: &SessionHandle<L::Driver>,
        navigator: &Navigator,
        flow: &OrderFlow,
        ids: &[OrderId],
        tally: &mut Tally,
    ) {
        let driver = session.driver();
        let failure_log = FailureLog::new(self.config.failure_log_path());
        let total = ids.len();

        for (i, order_id) in ids.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("⏹️ 已取消，剩余 {} 个订单不再处理", total - i);
                break;
            }

            let ctx = OrderCtx::new(order_id.clone(), i + 1, total);
            log_order_start(&ctx);
            self.publish(&tally.stats, Some(order_id));

            let outcome = flow.process_order(driver, &ctx).await;
            match &outcome {
                OrderOutcome::Success(path) => {
                    info!("{} ✅ 发票已保存: {}", ctx, path.display());
                }
                OrderOutcome::Failed(_) => {
                    if let Err(e) = failure_log.append(order_id).await {
                        error!("{} ❌ 写入失败记录出错: {:#}", ctx, e);
                    }
                }
                OrderOutcome::Skipped => warn!("{} ⏭️ 已跳过", ctx),
            }
            tally.record(order_id, outcome);
            self.publish(&tally.stats, None);

            if !ctx.is_last()
                && !self.cancel.is_cancelled()
                && !navigator.return_to_search(driver).await
            {
                warn!("{} ⚠️ 未能回到搜索页，下一个订单会再次尝试", ctx);
            }
        }
    }

    fn prepare_output(&self) -> Result<(), SetupError> {
        for dir in [&self.config.download_path, &self.config.diagnostics_dir] {
            std::fs::create_dir_all(dir).map_err(|source| SetupError::OutputDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// 结束统计、推送最终进度、输出汇总
    fn finalize(&self, stats: &mut RunStatistics) {
        stats.finish();
        self.publish(stats, None);
        print_final_stats(stats, &self.config);

        let path = self.config.summary_path();
        match write_summary(&path, stats, &self.config) {
            Ok(()) => info!("📝 汇总已保存至: {}", path.display()),
            Err(e) => error!("❌ 保存汇总失败: {:#}", e),
        }
    }

    fn publish(&self, stats: &RunStatistics, current: Option<&OrderId>) {
        self.progress.send_replace(RunProgress {
            stats: stats.clone(),
            current: current.map(|id| id.to_string()),
        });
    }
}

/// 统计 + 结果记录
struct Tally {
    stats: RunStatistics,
    outcomes: Vec<(OrderId, OrderOutcome)>,
}

impl Tally {
    fn new(total: usize) -> Self {
        Self {
            stats: RunStatistics::start(total),
            outcomes: Vec::with_capacity(total),
        }
    }

    fn record(&mut self, order_id: &OrderId, outcome: OrderOutcome) {
        self.stats.record(&outcome);
        self.outcomes.push((order_id.clone(), outcome));
    }

    fn into_report(self, fatal: Option<RunError>) -> RunReport {
        RunReport {
            stats: self.stats,
            outcomes: self.outcomes,
            fatal,
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知错误".to_string()
    }
}
