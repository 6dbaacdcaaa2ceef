use crate::CoreError;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_POLL_ATTEMPTS: u32 = 80;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;

/// How long a reconciler keeps polling for a remote state transition.
///
/// The default (80 polls, 10 s apart) stays inside a fifteen-minute
/// invocation limit while leaving room for the acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patience {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for Patience {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl Patience {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Poll without sleeping; for tests and already-settled remotes.
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Call `poll` until it yields a value, an error, or attempts run out.
    pub fn wait_for<T, F>(&self, what: &str, mut poll: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Result<Option<T>, CoreError>,
    {
        let attempts = self.attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(value) = poll()? {
                return Ok(value);
            }
            debug!("{what}: not ready (attempt {attempt}/{attempts})");
            if attempt < attempts && self.interval_ms > 0 {
                std::thread::sleep(self.interval());
            }
        }
        Err(CoreError::Timeout {
            what: what.to_owned(),
            attempts,
        })
    }
}
