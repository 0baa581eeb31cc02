use chrono::{DateTime, Local};

use crate::models::order::OrderOutcome;

/// 运行统计
///
/// 每个订单在得到最终结果后记录一次；结束时把没轮到的订单计为 skipped，
/// 因此 `success + failed + skipped == total` 始终成立
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
}

impl RunStatistics {
    pub fn start(total: usize) -> Self {
        Self {
            total,
            success: 0,
            failed: 0,
            skipped: 0,
            start_time: Local::now(),
            end_time: None,
        }
    }

    /// 由结果序列重新推导统计
    pub fn from_outcomes<'a>(total: usize, outcomes: impl IntoIterator<Item = &'a OrderOutcome>) -> Self {
        let mut stats = Self::start(total);
        for outcome in outcomes {
            stats.record(outcome);
        }
        stats
    }

    pub fn record(&mut self, outcome: &OrderOutcome) {
        match outcome {
            OrderOutcome::Success(_) => self.success += 1,
            OrderOutcome::Failed(_) => self.failed += 1,
            OrderOutcome::Skipped => self.skipped += 1,
        }
    }

    /// 已得到结果的订单数
    pub fn processed(&self) -> usize {
        self.success + self.failed + self.skipped
    }

    /// 把剩余未处理的订单计为 skipped
    pub fn skip_remaining(&mut self) {
        self.skipped += self.total.saturating_sub(self.processed());
    }

    pub fn finish(&mut self) {
        self.skip_remaining();
        self.end_time = Some(Local::now());
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Local::now) - self.start_time
    }

    /// 成功率（百分比），total 为 0 时为 0
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success as f64 / self.total as f64 * 100.0
        }
    }
}

/// 推送给调用方的进度
#[derive(Debug, Clone, PartialEq)]
pub struct RunProgress {
    pub stats: RunStatistics,
    /// 正在处理的订单号
    pub current: Option<String>,
}

impl RunProgress {
    pub fn new(stats: RunStatistics) -> Self {
        Self {
            stats,
            current: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_record_and_rate() {
        let outcomes = vec![
            OrderOutcome::Success(PathBuf::from("invoices/SO1.png")),
            OrderOutcome::Failed("not found".into()),
            OrderOutcome::Success(PathBuf::from("invoices/SO3.png")),
            OrderOutcome::Skipped,
        ];
        let stats = RunStatistics::from_outcomes(4, &outcomes);
        assert_eq!((stats.success, stats.failed, stats.skipped), (2, 1, 1));
        assert_eq!(stats.processed(), 4);
        assert!((stats.success_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_finish_skips_the_rest() {
        let mut stats = RunStatistics::start(5);
        stats.record(&OrderOutcome::Success(PathBuf::from("a.png")));
        stats.finish();
        assert!(stats.is_finished());
        assert_eq!(stats.skipped, 4);
        assert_eq!(stats.success + stats.failed + stats.skipped, stats.total);
        assert!(stats.duration() >= chrono::Duration::zero());
    }

    #[test]
    fn test_empty_run_rate_is_zero() {
        let mut stats = RunStatistics::start(0);
        stats.finish();
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.skipped, 0);
    }
}
