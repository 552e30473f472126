use dashmap::DashSet;
use log::info;

pub const DEFAULT_CAPACITY: usize = 10_000;

/// Messages already relayed, keyed by (source chat, message id).
///
/// Unbounded growth is avoided by dropping everything once the set grows
/// past its capacity.
pub struct ForwardedSet {
    seen: DashSet<(i64, i64)>,
    capacity: usize,
}

impl ForwardedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: DashSet::new(),
            capacity,
        }
    }

    pub fn contains(&self, chat_id: i64, message_id: i64) -> bool {
        self.seen.contains(&(chat_id, message_id))
    }

    pub fn record(&self, chat_id: i64, message_id: i64) {
        self.seen.insert((chat_id, message_id));
        if self.seen.len() > self.capacity {
            info!("Forwarded set exceeded {} entries, clearing", self.capacity);
            self.seen.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}

impl Default for ForwardedSet {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_per_chat() {
        let set = ForwardedSet::default();
        set.record(-100, 7);

        assert!(set.contains(-100, 7));
        assert!(!set.contains(-200, 7));
        assert!(!set.contains(-100, 8));
    }

    #[test]
    fn clears_once_capacity_is_exceeded() {
        let set = ForwardedSet::new(3);
        for id in 0..3 {
            set.record(1, id);
        }
        assert_eq!(set.len(), 3);

        set.record(1, 3);
        assert_eq!(set.len(), 0);
        assert!(!set.contains(1, 0));
    }
}
