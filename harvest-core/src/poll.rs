use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Fixed probe interval and a hard ceiling for one bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub ceiling: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, ceiling: Duration) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            ceiling,
        }
    }

    pub fn start(&self) -> Poller {
        Poller {
            interval: self.interval,
            deadline: Instant::now() + self.ceiling,
        }
    }

    /// Starts a nested wait that never outlives `outer`.
    pub fn start_within(&self, outer: &Poller) -> Poller {
        let mut poller = self.start();
        poller.deadline = poller.deadline.min(outer.deadline);
        poller
    }
}

#[derive(Debug)]
pub struct Poller {
    interval: Duration,
    deadline: Instant,
}

impl Poller {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Sleeps until the next probe is due. Returns `false` once the deadline has
    /// passed; the final sleep is clipped so the deadline is never overshot.
    pub async fn tick(&mut self) -> bool {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return false;
        }
        sleep(self.interval.min(remaining)).await;
        true
    }
}

/// Runs `probe` until it yields a value or the poller's deadline passes.
///
/// The first probe happens immediately and the last one happens at the deadline.
pub async fn poll_until<T, F, Fut>(mut poller: Poller, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if !poller.tick().await {
            return None;
        }
    }
}
