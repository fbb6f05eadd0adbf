use std::sync::Arc;

use chrono::Duration;

use super::clock::Clock;
use super::token::decode_token;

/// Tokens are treated as expired this long before their `exp`.
/// Covers requests that are in flight when the token lapses.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 300;

/// Expiry checks over raw token strings.
///
/// Undecodable tokens and tokens without `exp` are always expired.
#[derive(Clone)]
pub struct ExpiryEvaluator {
    clock: Arc<dyn Clock>,
    buffer: Duration,
}

impl ExpiryEvaluator {
    pub fn new(clock: Arc<dyn Clock>, buffer: Duration) -> Self {
        Self { clock, buffer }
    }

    pub fn with_default_buffer(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, Duration::seconds(DEFAULT_EXPIRY_BUFFER_SECS))
    }

    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    /// Buffered check: `exp < now + buffer`.
    pub fn is_expired(&self, token: &str) -> bool {
        match decode_token(token).and_then(|claims| claims.exp) {
            Some(exp) => {
                let cutoff = self
                    .clock
                    .now()
                    .timestamp()
                    .saturating_add(self.buffer.num_seconds());
                exp < cutoff
            }
            None => true,
        }
    }

    /// Unbuffered time left before `exp`, zero once it has passed.
    /// Saturates at `Duration::MAX` for `exp` values beyond chrono's range.
    pub fn time_remaining(&self, token: &str) -> Duration {
        match decode_token(token).and_then(|claims| claims.exp) {
            Some(exp) => {
                let secs = exp.saturating_sub(self.clock.now().timestamp()).max(0);
                Duration::try_seconds(secs).unwrap_or(Duration::MAX)
            }
            None => Duration::zero(),
        }
    }
}
