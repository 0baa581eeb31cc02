//! 日志初始化
//!
//! 同时输出到终端和 `{log_dir}/automation_{时间戳}.log`。
//! 设置了 `RUST_LOG` 时以环境变量为准，否则使用配置中的 `log_level`。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// 初始化日志，返回日志文件路径
pub fn init(level: &str, log_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("无法创建日志目录: {}", log_dir.display()))?;

    let file_name = format!(
        "automation_{}.log",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let file_appender = rolling::never(log_dir, &file_name);

    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_filter(filter()))
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_filter(filter()),
        )
        .try_init()
        .context("日志系统初始化失败")?;

    Ok(log_dir.join(file_name))
}
