use std::time::{Duration, Instant};

/// A timer entry: fires once at `deadline`, identified by `id` so the
/// reactor can route the firing to the right pollable object.
#[derive(Debug, Clone, Copy)]
struct Entry {
    deadline: Instant,
    id: u64,
}

/// A sorted list of pending timers.
///
/// Kept as a flat `Vec` sorted by deadline rather than a binary heap: the
/// reactor's timer population is small (one reconnect timer per delaying
/// session, one handshake-timeout timer per connecting engine), so linear
/// insertion is simpler than a heap and cheap in practice — the same
/// tradeoff the `other_examples` reactor timer helper makes.
#[derive(Debug, Default)]
pub struct Timers {
    entries: Vec<Entry>,
    next_id: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a timer `duration` from `now`, returning an id usable with
    /// [`Timers::cancel`].
    pub fn add(&mut self, now: Instant, duration: Duration) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let deadline = now + duration;
        let pos = self.entries.partition_point(|e| e.deadline <= deadline);
        self.entries.insert(pos, Entry { deadline, id });
        id
    }

    pub fn cancel(&mut self, id: u64) {
        self.entries.retain(|e| e.id != id);
    }

    /// Duration until the nearest deadline, or `None` if no timers are
    /// pending (the reactor should then block indefinitely).
    pub fn next_expiring_from(&self, now: Instant) -> Option<Duration> {
        self.entries
            .first()
            .map(|e| e.deadline.saturating_duration_since(now))
    }

    /// Remove and return the ids of every timer whose deadline has passed
    /// as of `now`.
    pub fn remove_expired_by(&mut self, now: Instant) -> Vec<u64> {
        let split = self.entries.partition_point(|e| e.deadline <= now);
        self.entries.drain(..split).map(|e| e.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_in_deadline_order() {
        let mut timers = Timers::new();
        let now = Instant::now();
        let a = timers.add(now, Duration::from_millis(10));
        let b = timers.add(now, Duration::from_millis(5));

        let expired = timers.remove_expired_by(now + Duration::from_millis(20));
        assert_eq!(expired, vec![b, a]);
        assert!(timers.is_empty());
    }

    #[test]
    fn cancel_removes_entry() {
        let mut timers = Timers::new();
        let now = Instant::now();
        let id = timers.add(now, Duration::from_millis(5));
        timers.cancel(id);
        assert!(timers.remove_expired_by(now + Duration::from_millis(10)).is_empty());
    }
}
