//! Always-on timing and counter aggregation.
//!
//! Coarse enough to leave enabled in release builds; the CLI prints the
//! summary when run with `--verbose`.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Named metrics tracked by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Metric {
    RuntimeLoad,
    WeightsLoad,
    WeightsSave,
    AudioLoad,
    MelExtract,
    Preprocess,
    ConditionTransform,
    DecoderFull,
    DecoderStep,
    Sample,
    MelFrames,
    GeneratedSamples,
    GeneratedChunks,
}

impl Metric {
    const COUNT: usize = 13;

    const ALL: [Metric; Metric::COUNT] = [
        Metric::RuntimeLoad,
        Metric::WeightsLoad,
        Metric::WeightsSave,
        Metric::AudioLoad,
        Metric::MelExtract,
        Metric::Preprocess,
        Metric::ConditionTransform,
        Metric::DecoderFull,
        Metric::DecoderStep,
        Metric::Sample,
        Metric::MelFrames,
        Metric::GeneratedSamples,
        Metric::GeneratedChunks,
    ];

    /// Report label.
    pub fn name(self) -> &'static str {
        match self {
            Metric::RuntimeLoad => "runtime.load",
            Metric::WeightsLoad => "weights.load",
            Metric::WeightsSave => "weights.save",
            Metric::AudioLoad => "audio.load",
            Metric::MelExtract => "audio.mel",
            Metric::Preprocess => "audio.preprocess",
            Metric::ConditionTransform => "encoder.transform",
            Metric::DecoderFull => "decoder.full",
            Metric::DecoderStep => "decoder.step",
            Metric::Sample => "generator.sample",
            Metric::MelFrames => "audio.mel_frames",
            Metric::GeneratedSamples => "generator.samples",
            Metric::GeneratedChunks => "generator.chunks",
        }
    }

    fn is_counter(self) -> bool {
        matches!(
            self,
            Metric::MelFrames | Metric::GeneratedSamples | Metric::GeneratedChunks
        )
    }

    fn index(self) -> usize {
        self as usize
    }
}

struct Slot {
    total_us: AtomicU64,
    count: AtomicU64,
}

struct PerfCollector {
    start: Instant,
    slots: [Slot; Metric::COUNT],
}

impl PerfCollector {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            slots: std::array::from_fn(|_| Slot {
                total_us: AtomicU64::new(0),
                count: AtomicU64::new(0),
            }),
        }
    }

    fn record(&self, metric: Metric, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let slot = &self.slots[metric.index()];
        slot.total_us.fetch_add(micros, Ordering::Relaxed);
        slot.count.fetch_add(1, Ordering::Relaxed);
    }

    fn bump(&self, metric: Metric, delta: u64) {
        self.slots[metric.index()]
            .count
            .fetch_add(delta, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PerfSnapshot {
        let rows = Metric::ALL
            .iter()
            .map(|&metric| {
                let slot = &self.slots[metric.index()];
                (
                    metric,
                    slot.total_us.load(Ordering::Relaxed),
                    slot.count.load(Ordering::Relaxed),
                )
            })
            .collect();
        PerfSnapshot {
            uptime: self.start.elapsed(),
            rows,
        }
    }
}

static COLLECTOR: OnceLock<PerfCollector> = OnceLock::new();

fn collector() -> &'static PerfCollector {
    COLLECTOR.get_or_init(PerfCollector::new)
}

/// Timer that records into its metric when dropped.
pub struct PerfSpan {
    metric: Metric,
    start: Instant,
}

impl Drop for PerfSpan {
    fn drop(&mut self) {
        collector().record(self.metric, self.start.elapsed());
    }
}

/// Start timing `metric` until the returned guard is dropped.
pub fn span(metric: Metric) -> PerfSpan {
    PerfSpan {
        metric,
        start: Instant::now(),
    }
}

/// Add `delta` to a counter metric.
pub fn add_count(metric: Metric, delta: u64) {
    collector().bump(metric, delta);
}

/// Point-in-time copy of all metrics.
#[derive(Debug)]
pub struct PerfSnapshot {
    uptime: Duration,
    rows: Vec<(Metric, u64, u64)>,
}

impl PerfSnapshot {
    /// Total count recorded for `metric`.
    pub fn count(&self, metric: Metric) -> u64 {
        self.rows
            .iter()
            .find(|(m, _, _)| *m == metric)
            .map(|(_, _, count)| *count)
            .unwrap_or(0)
    }

    /// Human-readable table, durations sorted by total time.
    pub fn format(&self) -> String {
        let mut durations: Vec<_> = self
            .rows
            .iter()
            .filter(|(metric, total, count)| !metric.is_counter() && (*total > 0 || *count > 0))
            .collect();
        let mut counters: Vec<_> = self
            .rows
            .iter()
            .filter(|(metric, _, count)| metric.is_counter() && *count > 0)
            .collect();
        durations.sort_by(|a, b| b.1.cmp(&a.1));
        counters.sort_by(|a, b| b.2.cmp(&a.2));

        let mut out = String::new();
        let _ = writeln!(
            out,
            "Performance summary (uptime: {:.3}s)",
            self.uptime.as_secs_f64()
        );
        if durations.is_empty() && counters.is_empty() {
            let _ = writeln!(out, "No performance data recorded.");
            return out;
        }
        if !durations.is_empty() {
            let _ = writeln!(out, "Durations:");
            let _ = writeln!(
                out,
                "  {:<24} {:>10} {:>8} {:>10}",
                "name", "total", "count", "avg"
            );
            for (metric, total_us, count) in durations {
                let avg_ms = if *count == 0 {
                    0.0
                } else {
                    *total_us as f64 / *count as f64 / 1000.0
                };
                let _ = writeln!(
                    out,
                    "  {:<24} {:>10.3}s {:>8} {:>10.3}ms",
                    metric.name(),
                    *total_us as f64 / 1_000_000.0,
                    count,
                    avg_ms
                );
            }
        }
        if !counters.is_empty() {
            let _ = writeln!(out, "Counters:");
            for (metric, _, count) in counters {
                let _ = writeln!(out, "  {:<24} {}", metric.name(), count);
            }
        }
        out
    }
}

/// Snapshot of the global collector.
pub fn snapshot() -> PerfSnapshot {
    collector().snapshot()
}

/// Formatted report of everything recorded so far.
pub fn report() -> String {
    snapshot().format()
}
