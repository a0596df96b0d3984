//! ネットワーク系処理のリトライ

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::ScraperError;

/// 最初の試行 + 最大 `max_retries` 回の再試行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// `op` を実行し、リトライ可能なエラーなら `delay` 待って再実行する
    ///
    /// リトライ不可のエラーはそのまま返す。試行回数を使い切ったら
    /// `RetriesExhausted` を返す。
    pub async fn run<T, F, Fut>(&self, description: &str, mut op: F) -> Result<T, ScraperError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ScraperError>>,
    {
        let attempts = self.max_attempts();
        let mut last_error = None;

        for attempt in 1..=attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    if attempt < attempts {
                        warn!(
                            "{} attempt {}/{} failed, retrying in {:?}: {}",
                            description, attempt, attempts, self.delay, e
                        );
                        sleep(self.delay).await;
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ScraperError::RetriesExhausted {
            attempts,
            message: last_error
                .map(|e| format!("{}: {}", description, e))
                .unwrap_or_else(|| description.to_string()),
        })
    }
}
