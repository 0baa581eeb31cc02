//! 可取消的等待

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// 毫秒转 Duration
pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// 固定等待，取消时提前返回
///
/// 返回 `true` 表示完整等待完毕，`false` 表示被取消
pub async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if duration.is_zero() {
        return true;
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_pause_completes() {
        let cancel = CancellationToken::new();
        assert!(pause(&cancel, ms(5)).await);
        assert!(pause(&cancel, Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_pause_returns_early_on_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ms(20)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        assert!(!pause(&cancel, Duration::from_secs(30)).await);
        assert!(start.elapsed() < Duration::from_secs(5));

        // 已取消后不再等待
        assert!(!pause(&cancel, Duration::ZERO).await);
    }
}
