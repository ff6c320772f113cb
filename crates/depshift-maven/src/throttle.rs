use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Token-bucket limiter shared by every request against one host.
#[derive(Clone)]
pub struct Throttle {
    name: &'static str,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl Throttle {
    /// A zero rate is treated as one request per second.
    pub fn per_second(name: &'static str, qps: u32) -> Self {
        let qps = NonZeroU32::new(qps).unwrap_or(NonZeroU32::MIN);
        Self {
            name,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(qps))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Waits for the next free slot.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Takes a slot only if one is free right now.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle").field("name", &self.name).finish()
    }
}
