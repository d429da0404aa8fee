// Byte counters for an export, reported when the plugin unloads.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    bytes_zeroed: AtomicU64,
    bytes_trimmed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub bytes_zeroed: u64,
    pub bytes_trimmed: u64,
}

impl Stats {
    pub fn add_read(&self, count: u32) {
        self.bytes_read.fetch_add(u64::from(count), Ordering::Relaxed);
    }

    pub fn add_written(&self, count: u32) {
        self.bytes_written.fetch_add(u64::from(count), Ordering::Relaxed);
    }

    pub fn add_zeroed(&self, count: u32) {
        self.bytes_zeroed.fetch_add(u64::from(count), Ordering::Relaxed);
    }

    pub fn add_trimmed(&self, count: u32) {
        self.bytes_trimmed.fetch_add(u64::from(count), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_zeroed: self.bytes_zeroed.load(Ordering::Relaxed),
            bytes_trimmed: self.bytes_trimmed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "read {}, written {}, zeroed {}, trimmed {}",
            self.bytes_read, self.bytes_written, self.bytes_zeroed, self.bytes_trimmed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::default();
        stats.add_read(10);
        stats.add_read(5);
        stats.add_written(7);
        stats.add_trimmed(1);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_read, 15);
        assert_eq!(snapshot.bytes_written, 7);
        assert_eq!(snapshot.bytes_zeroed, 0);
        assert_eq!(snapshot.to_string(), "read 15, written 7, zeroed 0, trimmed 1");
    }
}
