//! Cross-monitor market-cap change filter.
//!
//! Keyed by token address rather than monitor id, so several monitors
//! watching the same token share one notification cadence. The map is the
//! only state shared between workers besides the store and the engine
//! registry; the mutex is never held across I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

const DEFAULT_CHANGE_THRESHOLD: f64 = 0.05;
const MIN_CHANGE_THRESHOLD: f64 = 0.01;
const MAX_CHANGE_THRESHOLD: f64 = 1.0;

pub struct ChangeFilter {
    last_market_caps: Mutex<HashMap<String, f64>>,
    /// Fraction of change that admits a notification, clamped to
    /// [0.01, 1.0]. Admission compares the absolute change; the returned
    /// percentage stays signed so callers can word surge vs drop.
    threshold: Mutex<f64>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self {
            last_market_caps: Mutex::new(HashMap::new()),
            threshold: Mutex::new(DEFAULT_CHANGE_THRESHOLD),
        }
    }

    /// Records `current_mc` for `token_address` and decides whether the move
    /// since the last admitted observation is big enough to notify.
    ///
    /// First observation for an address stores the value and returns
    /// `(false, None)`. Afterwards the signed percent change is always
    /// returned; the stored value only advances when the change is admitted.
    pub fn observe(&self, token_address: &str, current_mc: f64) -> (bool, Option<f64>) {
        let threshold = *self.threshold.lock().unwrap();
        let mut caps = self.last_market_caps.lock().unwrap();

        let last_mc = match caps.get(token_address) {
            Some(&v) => v,
            None => {
                caps.insert(token_address.to_string(), current_mc);
                return (false, None);
            }
        };

        if last_mc <= 0.0 {
            return (false, None);
        }

        let ratio = (current_mc - last_mc) / last_mc;
        let percent_change = ratio * 100.0;
        if ratio.abs() >= threshold {
            caps.insert(token_address.to_string(), current_mc);
            (true, Some(percent_change))
        } else {
            (false, Some(percent_change))
        }
    }

    pub fn set_threshold(&self, threshold: f64) {
        let clamped = threshold.clamp(MIN_CHANGE_THRESHOLD, MAX_CHANGE_THRESHOLD);
        *self.threshold.lock().unwrap() = clamped;
    }

    pub fn threshold(&self) -> f64 {
        *self.threshold.lock().unwrap()
    }

    /// Drops entries for token addresses no longer watched by any running
    /// monitor.
    pub fn cleanup_unused(&self, active_tokens: &HashSet<String>) {
        self.last_market_caps
            .lock()
            .unwrap()
            .retain(|addr, _| active_tokens.contains(addr));
    }

    pub fn clear(&self) {
        self.last_market_caps.lock().unwrap().clear();
    }

    pub fn tracked_count(&self) -> usize {
        self.last_market_caps.lock().unwrap().len()
    }
}

impl Default for ChangeFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_is_silent() {
        let filter = ChangeFilter::new();
        assert_eq!(filter.observe("mint-a", 1_000_000.0), (false, None));
    }

    #[test]
    fn admits_moves_at_or_above_threshold_with_signed_percent() {
        let filter = ChangeFilter::new();
        filter.observe("mint-a", 1_000_000.0);

        // +6% admitted, signed positive
        let (notify, pct) = filter.observe("mint-a", 1_060_000.0);
        assert!(notify);
        assert!((pct.unwrap() - 6.0).abs() < 1e-9);

        // -10% from the new baseline, signed negative
        let (notify, pct) = filter.observe("mint-a", 954_000.0);
        assert!(notify);
        assert!(pct.unwrap() < 0.0);
    }

    #[test]
    fn small_moves_return_signed_percent_without_advancing_baseline() {
        let filter = ChangeFilter::new();
        filter.observe("mint-a", 1_000_000.0);

        let (notify, pct) = filter.observe("mint-a", 1_020_000.0);
        assert!(!notify);
        assert!((pct.unwrap() - 2.0).abs() < 1e-9);

        // Baseline did not move: 4.9% total from the original observation
        // still stays below the 5% default.
        let (notify, pct) = filter.observe("mint-a", 1_049_000.0);
        assert!(!notify);
        assert!((pct.unwrap() - 4.9).abs() < 1e-9);

        // ...and 5.1% is admitted.
        let (notify, _) = filter.observe("mint-a", 1_051_000.0);
        assert!(notify);
    }

    #[test]
    fn threshold_is_clamped() {
        let filter = ChangeFilter::new();
        filter.set_threshold(0.0001);
        assert!((filter.threshold() - 0.01).abs() < 1e-12);
        filter.set_threshold(5.0);
        assert!((filter.threshold() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn addresses_are_independent_and_cleanup_drops_inactive() {
        let filter = ChangeFilter::new();
        filter.observe("mint-a", 100.0);
        filter.observe("mint-b", 200.0);
        assert_eq!(filter.tracked_count(), 2);

        let active: HashSet<String> = ["mint-b".to_string()].into_iter().collect();
        filter.cleanup_unused(&active);
        assert_eq!(filter.tracked_count(), 1);

        // mint-a starts over after cleanup
        assert_eq!(filter.observe("mint-a", 300.0), (false, None));
    }
}
