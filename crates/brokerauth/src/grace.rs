//! Startup grace window.
//!
//! Right after a broker restart every previously connected client
//! reconnects at once. Sending all of them to slow backends in the same
//! second can take those backends down, so for a short window after the
//! first decision every request is approved without consulting anything.
//! The window is global: it is not tracked per backend or per client.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;

const UNSET: i64 = 0;

fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Once-initialized fail-open deadline.
#[derive(Debug)]
pub struct GraceWindow {
    duration_ms: i64,
    deadline_ms: AtomicI64,
}

impl GraceWindow {
    /// Creates a window that opens on the first decision. A zero duration
    /// disables the window.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration_ms: i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
            deadline_ms: AtomicI64::new(UNSET),
        }
    }

    /// A window that never allows unconditionally.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.duration_ms > 0
    }

    /// Returns `true` while decisions must be approved unconditionally.
    ///
    /// The first call sets the deadline to `now + duration`. Concurrent first
    /// calls race on a compare-and-set; the losers adopt the winner's
    /// deadline.
    pub fn should_allow(&self, now: OffsetDateTime) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let now_ms = unix_millis(now);
        let mut deadline = self.deadline_ms.load(Ordering::Acquire);

        if deadline == UNSET {
            let candidate = now_ms.saturating_add(self.duration_ms);
            deadline = match self.deadline_ms.compare_exchange(
                UNSET,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::warn!(
                        deadline_ms = candidate,
                        window_ms = self.duration_ms,
                        "startup grace window started, approving all requests"
                    );
                    candidate
                }
                Err(existing) => existing,
            };
        }

        now_ms < deadline
    }

    /// The deadline, once set.
    #[must_use]
    pub fn deadline(&self) -> Option<OffsetDateTime> {
        match self.deadline_ms.load(Ordering::Acquire) {
            UNSET => None,
            ms => OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok(),
        }
    }
}
