use std::path::PathBuf;

use anyhow::{Context, Result};
use crm_invoice_fetch::config::DEFAULT_CONFIG_PATH;
use crm_invoice_fetch::{logger, ChromiumLauncher, Config, Runner};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置（CRM_CONFIG 指定路径，环境变量可覆盖各项）
    let config_path = std::env::var("CRM_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(&config_path).context("加载配置失败")?;

    // 初始化日志
    let log_file = logger::init(&config.log_level, &config.log_dir)?;
    info!("📝 日志文件: {}", log_file.display());

    if config_path.exists() {
        info!("已加载配置文件: {}", config_path.display());
    } else {
        warn!("⚠️ 配置文件不存在: {}，使用默认配置", config_path.display());
    }
    for warning in config.validate().context("配置校验失败")? {
        warn!("⚠️ {}", warning);
    }

    // 订单列表：命令行参数优先，其次是配置
    let input = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| config.input_path.clone())
        .context("未指定订单列表文件（命令行参数或配置项 input_path）")?;

    let runner = Runner::new(config, ChromiumLauncher);

    // Ctrl-C：当前订单完成当前步骤后停止
    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️ 收到 Ctrl-C，正在停止...");
            cancel.cancel();
        }
    });

    let report = runner.run_from_input(&input).await;
    match report.fatal {
        Some(e) => {
            error!("❌ 运行失败: {}", e);
            Err(e.into())
        }
        None => Ok(()),
    }
}
