use anyhow::{Context, Result};
/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::models::RunStatistics;
use crate::workflow::OrderCtx;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 记录程序启动信息
///
/// # 参数
/// - `config`: 运行配置
/// - `total`: 订单总数
pub fn log_startup(config: &Config, total: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 CRM 发票抓取启动");
    info!("🌐 CRM 地址: {}", config.crm_url);
    info!("📋 待处理订单: {} 个", total);
    info!(
        "🔁 每个订单最多尝试 {} 次 | headless: {}",
        config.attempts(),
        config.headless
    );
    info!("📁 发票目录: {}", config.download_path.display());
    info!("{}", "=".repeat(60));
}

/// 记录单个订单开始
pub fn log_order_start(ctx: &OrderCtx) {
    info!("\n{}", "─".repeat(60));
    info!("📦 处理 {}/{}: {}", ctx.index, ctx.total, ctx.order_id);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `stats`: 运行统计
/// - `config`: 运行配置
pub fn print_final_stats(stats: &RunStatistics, config: &Config) {
    info!("\n{}", "=".repeat(60));
    info!("📊 运行汇总");
    if let Some(end) = stats.end_time {
        info!("完成时间: {}", end.format(TIME_FORMAT));
    }
    info!("{}", "=".repeat(60));
    info!("📋 订单总数: {}", stats.total);
    info!("✅ 成功: {}", stats.success);
    info!("❌ 失败: {}", stats.failed);
    info!("⏭️ 跳过: {}", stats.skipped);
    info!("⏱️ 耗时: {}", format_duration(stats.duration()));
    info!("📁 发票目录: {}", config.download_path.display());
    if stats.total > 0 {
        info!("📈 成功率: {:.1}%", stats.success_rate());
    }
    info!("{}", "=".repeat(60));
}

/// 写入汇总文件（覆盖）
pub fn write_summary(path: &Path, stats: &RunStatistics, config: &Config) -> Result<()> {
    let mut content = format!("CRM 发票抓取汇总\n{}\n", "=".repeat(40));
    content.push_str(&format!("开始时间: {}\n", stats.start_time.format(TIME_FORMAT)));
    if let Some(end) = stats.end_time {
        content.push_str(&format!("结束时间: {}\n", end.format(TIME_FORMAT)));
    }
    content.push_str(&format!("耗时: {}\n", format_duration(stats.duration())));
    content.push_str(&format!("订单总数: {}\n", stats.total));
    content.push_str(&format!("成功: {}\n", stats.success));
    content.push_str(&format!("失败: {}\n", stats.failed));
    content.push_str(&format!("跳过: {}\n", stats.skipped));
    if stats.total > 0 {
        content.push_str(&format!("成功率: {:.1}%\n", stats.success_rate()));
    }
    content.push_str(&format!("发票目录: {}\n", config.download_path.display()));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("无法创建目录: {}", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("无法写入汇总文件: {}", path.display()))?;
    Ok(())
}

/// 格式化时长为 `HH:MM:SS`
pub fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderOutcome;
    use std::path::PathBuf;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(0)), "00:00:00");
        assert_eq!(format_duration(chrono::Duration::seconds(3725)), "01:02:05");
        assert_eq!(format_duration(chrono::Duration::seconds(-3)), "00:00:00");
    }

    #[test]
    fn test_write_summary_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automation_summary.txt");
        std::fs::write(&path, "old content").unwrap();

        let mut stats = RunStatistics::start(2);
        stats.record(&OrderOutcome::Success(PathBuf::from("SO1.png")));
        stats.record(&OrderOutcome::Failed("not found".into()));
        stats.finish();
        write_summary(&path, &stats, &Config::default()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("old content"));
        assert!(content.contains("订单总数: 2"));
        assert!(content.contains("成功: 1"));
        assert!(content.contains("失败: 1"));
        assert!(content.contains("成功率: 50.0%"));
    }
}
