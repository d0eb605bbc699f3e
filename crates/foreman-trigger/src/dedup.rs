//! Bounded in-memory dedup window for webhook delivery ids.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default dedup window. Providers redeliver within minutes; anything
/// older is caught by the duplicate-session guard instead.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Remembers recently seen delivery ids. Pruned on every access, so the
/// map never outgrows the number of deliveries in one TTL window.
#[derive(Debug)]
pub struct DeliveryDedup {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DeliveryDedup {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Records the id and reports whether it was fresh.
    ///
    /// Returns `false` when the id was already seen inside the window.
    pub fn check_and_insert(&self, delivery_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.retain(|_, at| now.duration_since(*at) < self.ttl);

        match seen.get(delivery_id) {
            Some(_) => false,
            None => {
                seen.insert(delivery_id.to_string(), now);
                true
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl Default for DeliveryDedup {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_window_is_rejected() {
        let dedup = DeliveryDedup::default();
        assert!(dedup.check_and_insert("d-1"));
        assert!(!dedup.check_and_insert("d-1"));
        assert!(dedup.check_and_insert("d-2"));
    }

    #[test]
    fn expired_entries_are_pruned_and_readmitted() {
        let dedup = DeliveryDedup::new(Duration::from_millis(20));
        assert!(dedup.check_and_insert("d-1"));
        std::thread::sleep(Duration::from_millis(40));
        // Window expired: same id passes again, map does not grow.
        assert!(dedup.check_and_insert("d-1"));
        assert_eq!(dedup.len(), 1);
    }
}
