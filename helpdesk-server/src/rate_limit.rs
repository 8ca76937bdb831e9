use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Sliding-window admission control keyed by client identity.
///
/// Each identity owns a queue of admission timestamps, oldest first. The
/// queue is pruned to the window before every decision and only grows when a
/// request is admitted, so rejected attempts never extend a lockout.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: DashMap::new(),
        }
    }

    pub fn check(&self, identity: &str) -> bool {
        self.check_at(identity, Instant::now())
    }

    /// Decide admission for `identity` as of `now`.
    ///
    /// The entry's shard lock is held from prune to push, so concurrent
    /// requests from one identity are serialized and cannot both pass on a
    /// stale count.
    pub fn check_at(&self, identity: &str, now: Instant) -> bool {
        let mut hits = self.hits.entry(identity.to_owned()).or_default();
        prune(&mut hits, now, self.window);

        if hits.len() >= self.limit {
            debug!(identity, count = hits.len(), "rate limit reached");
            return false;
        }

        hits.push_back(now);
        true
    }

    /// Prune every entry and drop identities with no hits left in the window.
    /// Returns how many identities were evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.hits.len();
        self.hits.retain(|_, hits| {
            prune(hits, now, self.window);
            !hits.is_empty()
        });
        before.saturating_sub(self.hits.len())
    }

    pub fn tracked_identities(&self) -> usize {
        self.hits.len()
    }
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = hits.front() {
        if now.saturating_duration_since(*front) > window {
            hits.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter() -> RateLimiter {
        RateLimiter::new(15, Duration::from_secs(60))
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn admits_up_to_limit_then_recovers_after_window() {
        let limiter = limiter();
        let start = Instant::now();

        for i in 0..15 {
            let at = start + secs(i as f64 * 10.0 / 15.0);
            assert!(limiter.check_at("1.2.3.4", at), "request {i} should be admitted");
        }
        assert!(!limiter.check_at("1.2.3.4", start + secs(11.0)));
        assert!(limiter.check_at("1.2.3.4", start + secs(61.0)));
    }

    #[test]
    fn rejected_attempts_are_not_recorded() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check_at("a", start));
        assert!(limiter.check_at("a", start + secs(30.0)));
        for i in 0..10 {
            assert!(!limiter.check_at("a", start + secs(40.0 + i as f64)));
        }
        // Only the first hit has aged out; the rejections above left no trace.
        assert!(limiter.check_at("a", start + secs(61.0)));
        assert!(!limiter.check_at("a", start + secs(62.0)));
    }

    #[test]
    fn stale_hits_are_pruned_before_counting() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check_at("a", start));
        assert!(!limiter.check_at("a", start + secs(60.0)));
        assert!(limiter.check_at("a", start + secs(60.5)));
    }

    #[test]
    fn identities_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at("a", now));
        assert!(!limiter.check_at("a", now));
        assert!(limiter.check_at("b", now));
    }

    #[test]
    fn concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(limiter());
        let now = Instant::now();

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..64)
                .map(|_| {
                    let limiter = Arc::clone(&limiter);
                    scope.spawn(move || limiter.check_at("1.2.3.4", now) as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 15);
    }

    #[test]
    fn sweep_evicts_idle_identities() {
        let limiter = limiter();
        let start = Instant::now();

        limiter.check_at("old", start);
        limiter.check_at("fresh", start + secs(50.0));
        assert_eq!(limiter.tracked_identities(), 2);

        let evicted = limiter.sweep(start + secs(90.0));
        assert_eq!(evicted, 1);
        assert_eq!(limiter.tracked_identities(), 1);
        assert!(limiter.check_at("fresh", start + secs(90.0)));
    }
}
