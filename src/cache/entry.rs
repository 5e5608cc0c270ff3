//! Cached value with expiry and hit counting.

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
    pub hit_count: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, expires_at: Instant) -> Self {
        Self {
            value,
            expires_at,
            hit_count: 0,
        }
    }

    /// Live until (not including) `expires_at`.
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_expiry_boundary() {
        let now = Instant::now();
        let entry = CacheEntry::new("v", now + Duration::from_millis(10));
        assert!(entry.is_live(now));
        assert!(!entry.is_live(now + Duration::from_millis(10)));
        assert_eq!(entry.hit_count, 0);
    }
}
