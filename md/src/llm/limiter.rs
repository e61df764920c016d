//! Per-provider rate limiting
//!
//! Two sliding 60-second windows per provider: request count and token
//! volume. A call that would exceed either waits up to `rate_wait_max`
//! before failing rate_limited. State updates are small critical sections
//! behind a mutex; callers never hold the lock across an await.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use super::LlmError;

const WINDOW: Duration = Duration::from_secs(60);

struct ProviderWindow {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u64)>,
}

impl ProviderWindow {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            tokens: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while self.requests.front().map(|t| now.duration_since(*t) > WINDOW).unwrap_or(false) {
            self.requests.pop_front();
        }
        while self.tokens.front().map(|(t, _)| now.duration_since(*t) > WINDOW).unwrap_or(false) {
            self.tokens.pop_front();
        }
    }

    fn token_sum(&self) -> u64 {
        self.tokens.iter().map(|(_, n)| n).sum()
    }
}

/// Shared rate limiter across all providers
pub struct RateLimiter {
    rpm: usize,
    token_window: u64,
    windows: Mutex<HashMap<String, ProviderWindow>>,
}

impl RateLimiter {
    pub fn new(rpm: u32, token_window: u64) -> Self {
        Self {
            rpm: rpm as usize,
            token_window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take one request slot; Err carries how long to wait
    fn try_acquire(&self, provider: &str, estimated_tokens: u64) -> Result<(), Duration> {
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(provider.to_string()).or_insert_with(ProviderWindow::new);
        let now = Instant::now();
        window.prune(now);

        if window.requests.len() >= self.rpm {
            let oldest = *window.requests.front().unwrap();
            return Err(WINDOW.saturating_sub(now.duration_since(oldest)));
        }
        if window.token_sum() + estimated_tokens > self.token_window {
            let wait = window
                .tokens
                .front()
                .map(|(t, _)| WINDOW.saturating_sub(now.duration_since(*t)))
                .unwrap_or(Duration::from_secs(1));
            return Err(wait);
        }

        window.requests.push_back(now);
        Ok(())
    }

    /// Acquire a slot, waiting up to `wait_max` before failing rate_limited
    pub async fn acquire(&self, provider: &str, estimated_tokens: u64, wait_max: Duration) -> Result<(), LlmError> {
        let deadline = Instant::now() + wait_max;
        loop {
            match self.try_acquire(provider, estimated_tokens) {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(provider, ?wait, "Rate limiter exhausted wait budget");
                        return Err(LlmError::RateLimited { retry_after: wait });
                    }
                    let sleep = wait.min(deadline - now).min(Duration::from_millis(250));
                    tokio::time::sleep(sleep.max(Duration::from_millis(10))).await;
                }
            }
        }
    }

    /// Record actual token usage after a call completed
    pub fn record_tokens(&self, provider: &str, tokens: u64) {
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(provider.to_string()).or_insert_with(ProviderWindow::new);
        window.tokens.push_back((Instant::now(), tokens));
    }
}
