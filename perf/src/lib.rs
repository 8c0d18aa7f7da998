use std::time::Instant;

use serde::Serialize;

// ─── Latency samples ────────────────────────────────────────────────────────

/// Nanosecond samples of one SDS operation or of the publish-to-read delay.
#[derive(Debug, Default)]
pub struct Samples(Vec<u64>);

/// Nearest-rank summary of a [`Samples`] set.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Summary {
    pub count: usize,
    pub min: u64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub max: u64,
    pub mean: f64,
}

impl Samples {
    pub fn with_capacity(n: usize) -> Self {
        Self(Vec::with_capacity(n))
    }

    pub fn push(&mut self, ns: u64) {
        self.0.push(ns);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `None` when nothing was recorded.
    pub fn summarize(&mut self) -> Option<Summary> {
        let n = self.0.len();
        if n == 0 {
            return None;
        }
        self.0.sort_unstable();
        let s = &self.0;
        let rank = |q: f64| s[((q * n as f64).ceil() as usize).clamp(1, n) - 1];
        let total: u128 = s.iter().map(|&v| u128::from(v)).sum();
        Some(Summary {
            count: n,
            min: s[0],
            p50: rank(0.50),
            p90: rank(0.90),
            p99: rank(0.99),
            p999: rank(0.999),
            max: s[n - 1],
            mean: total as f64 / n as f64,
        })
    }
}

impl FromIterator<u64> for Samples {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub name: &'static str,
    pub unit: &'static str,
    pub summary: Summary,
}

/// Times `rounds` rounds of `ops` calls each, after one discarded warm-up
/// round, and records the mean cost of a call in every round.
pub fn time_per_op<F: FnMut()>(
    name: &'static str,
    rounds: usize,
    ops: usize,
    mut op: F,
) -> Option<Measurement> {
    let ops = ops.max(1);
    let mut samples = Samples::with_capacity(rounds);
    for round in 0..=rounds {
        let start = Instant::now();
        for _ in 0..ops {
            op();
        }
        if round > 0 {
            let per_op = start.elapsed().as_nanos() / ops as u128;
            samples.push((per_op as u64).max(1));
        }
    }
    Some(Measurement {
        name,
        unit: "ns/op",
        summary: samples.summarize()?,
    })
}

// ─── Process resources ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Rusage {
    pub peak_rss_bytes: u64,
    pub minor_faults: u64,
    pub major_faults: u64,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
}

impl Rusage {
    pub fn now() -> Self {
        // SAFETY: getrusage fills a caller-owned struct that zero bytes
        // already make valid.
        let u = unsafe {
            let mut u: libc::rusage = std::mem::zeroed();
            libc::getrusage(libc::RUSAGE_SELF, &mut u);
            u
        };
        // kilobytes on linux, bytes elsewhere
        let rss_scale = if cfg!(target_os = "linux") { 1024 } else { 1 };
        Self {
            peak_rss_bytes: u.ru_maxrss.max(0) as u64 * rss_scale,
            minor_faults: u.ru_minflt.max(0) as u64,
            major_faults: u.ru_majflt.max(0) as u64,
            voluntary_switches: u.ru_nvcsw.max(0) as u64,
            involuntary_switches: u.ru_nivcsw.max(0) as u64,
        }
    }

    /// Counters accumulated since `earlier`; the peak RSS stays absolute.
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            peak_rss_bytes: self.peak_rss_bytes,
            minor_faults: self.minor_faults.saturating_sub(earlier.minor_faults),
            major_faults: self.major_faults.saturating_sub(earlier.major_faults),
            voluntary_switches: self
                .voluntary_switches
                .saturating_sub(earlier.voluntary_switches),
            involuntary_switches: self
                .involuntary_switches
                .saturating_sub(earlier.involuntary_switches),
        }
    }
}

// ─── Clocks and scratch files ───────────────────────────────────────────────

/// Backing file for a shared-memory stream owned by this process.
pub fn shm_scratch_path(label: &str) -> String {
    format!("/tmp/strata_perf_{}_{label}", std::process::id())
}

/// Monotonic clock readable from any process on the host, so a writer can
/// stamp words that a reader elsewhere compares against.
#[inline]
pub fn mono_now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime only writes the timespec passed to it.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

// ─── Console output ─────────────────────────────────────────────────────────

pub fn human_bytes(bytes: u64) -> String {
    match bytes {
        b if b >= 1 << 20 => format!("{:.1} MB", b as f64 / (1u64 << 20) as f64),
        b if b >= 1 << 10 => format!("{:.1} KB", b as f64 / (1u64 << 10) as f64),
        b => format!("{b} B"),
    }
}

pub fn heading(title: &str) {
    let rule = "─".repeat(90);
    println!("\n{rule}\n  {title}\n{rule}\n");
}

/// Column layout shared by every latency table in the report.
pub struct LatencyTable;

impl LatencyTable {
    pub fn header() {
        println!(
            "  {:<28} {:>8} {:>8} {:>8} {:>8} {:>8} {:>10}  unit",
            "operation", "min", "p50", "p99", "p99.9", "max", "mean"
        );
        println!("  {}", "─".repeat(94));
    }

    pub fn row(m: &Measurement) {
        let s = &m.summary;
        println!(
            "  {:<28} {:>8} {:>8} {:>8} {:>8} {:>8} {:>10.1}  {}",
            m.name, s.min, s.p50, s.p99, s.p999, s.max, s.mean, m.unit
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_uses_nearest_rank() {
        let mut samples: Samples = (1..=100).rev().collect();
        let s = samples.summarize().unwrap();
        assert_eq!((s.min, s.max, s.count), (1, 100, 100));
        assert_eq!((s.p50, s.p90, s.p99, s.p999), (50, 90, 99, 100));
        assert!((s.mean - 50.5).abs() < f64::EPSILON);
    }

    #[test]
    fn one_sample_fills_every_rank() {
        let mut samples: Samples = std::iter::once(7).collect();
        let s = samples.summarize().unwrap();
        assert_eq!((s.min, s.p50, s.p999, s.max), (7, 7, 7, 7));
    }

    #[test]
    fn empty_samples_have_no_summary() {
        assert!(Samples::default().summarize().is_none());
    }

    #[test]
    fn timing_records_one_sample_per_round() {
        let mut calls = 0;
        let m = time_per_op("noop", 5, 10, || calls += 1).unwrap();
        assert_eq!(m.summary.count, 5);
        assert_eq!(calls, 60);
        assert!(m.summary.min >= 1);
    }

    #[test]
    fn rusage_delta_keeps_peak_rss() {
        let start = Rusage {
            peak_rss_bytes: 10,
            minor_faults: 3,
            ..Rusage::default()
        };
        let end = Rusage {
            peak_rss_bytes: 20,
            minor_faults: 5,
            ..Rusage::default()
        };
        let d = end.since(&start);
        assert_eq!((d.peak_rss_bytes, d.minor_faults), (20, 2));
    }

    #[test]
    fn byte_counts_are_humanized() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KB");
        assert_eq!(human_bytes(3 << 20), "3.0 MB");
    }

    #[test]
    fn monotonic_clock_advances() {
        let a = mono_now_ns();
        assert!(mono_now_ns() >= a);
    }
}
