//! Collection statistics.
//!
//! The heap is single-threaded, so these are plain counters updated at the
//! end of each scavenge and growth. The summary printer and the per-cycle
//! reporting in the collector both write to stderr.

use std::time::Duration;

/// Statistics about heap activity.
#[derive(Debug, Default)]
pub struct HeapStats {
    /// Number of completed scavenges.
    pub scavenges: u64,
    /// Number of semispace growths.
    pub grows: u64,
    /// Total time spent collecting.
    pub gc_time: Duration,
    /// Bytes freed across all scavenges.
    pub bytes_freed: u64,
    /// Live bytes after the most recent scavenge.
    pub live_bytes_after_last_gc: u64,
}

impl HeapStats {
    pub(crate) fn new() -> HeapStats {
        HeapStats::default()
    }

    pub(crate) fn record_scavenge(&mut self, duration: Duration, before: usize, after: usize) {
        self.scavenges += 1;
        self.gc_time += duration;
        self.bytes_freed += before.saturating_sub(after) as u64;
        self.live_bytes_after_last_gc = after as u64;
    }

    pub(crate) fn record_grow(&mut self) {
        self.grows += 1;
    }

    /// Average pause per scavenge.
    pub fn avg_pause(&self) -> Duration {
        if self.scavenges == 0 {
            return Duration::ZERO;
        }
        self.gc_time / self.scavenges as u32
    }

    /// Print a summary to stderr.
    pub fn print_summary(&self) {
        eprintln!("=== Heap Statistics ===");
        eprintln!("Scavenges: {} ({} grows)", self.scavenges, self.grows);
        eprintln!(
            "GC time: {:?} total, {:?} avg pause",
            self.gc_time,
            self.avg_pause()
        );
        eprintln!(
            "Freed: {}, live after last GC: {}",
            format_bytes(self.bytes_freed),
            format_bytes(self.live_bytes_after_last_gc)
        );
    }
}

/// Format bytes in human-readable form.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_scavenge() {
        let mut stats = HeapStats::new();
        stats.record_scavenge(Duration::from_micros(100), 4096, 1024);
        stats.record_scavenge(Duration::from_micros(300), 2048, 2048);

        assert_eq!(stats.scavenges, 2);
        assert_eq!(stats.bytes_freed, 3072);
        assert_eq!(stats.live_bytes_after_last_gc, 2048);
        assert_eq!(stats.avg_pause(), Duration::from_micros(200));
    }

    #[test]
    fn test_avg_pause_with_no_scavenges() {
        let stats = HeapStats::new();
        assert_eq!(stats.avg_pause(), Duration::ZERO);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }
}
