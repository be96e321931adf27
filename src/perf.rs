//! Process-wide timing and counter aggregation.
//!
//! Spans and counters are always on; the CLI prints [`report`] at exit when
//! `--verbose` is set.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Duration,
    Counter,
}

/// Named metrics tracked by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Metric {
    AudioAnalyze,
    GriffinLim,
    EncoderForward,
    DecoderForward,
    PostnetForward,
    TrainStep,
    LoaderBatch,
    CheckpointWrite,
    CheckpointLoad,
    SynthesizeText,
    AnalyzedFrames,
    DecoderSteps,
    TrainedExamples,
    DroppedExamples,
}

impl Metric {
    const COUNT: usize = 14;

    fn index(self) -> usize {
        self as usize
    }
}

const METRICS: [(&str, Kind); Metric::COUNT] = [
    ("audio.analyze", Kind::Duration),
    ("audio.griffin_lim", Kind::Duration),
    ("model.encoder", Kind::Duration),
    ("model.decoder", Kind::Duration),
    ("model.postnet", Kind::Duration),
    ("train.step", Kind::Duration),
    ("data.batch", Kind::Duration),
    ("checkpoint.write", Kind::Duration),
    ("checkpoint.load", Kind::Duration),
    ("synth.text", Kind::Duration),
    ("audio.frames", Kind::Counter),
    ("decoder.steps", Kind::Counter),
    ("train.examples", Kind::Counter),
    ("data.dropped", Kind::Counter),
];

struct Collector {
    start: Instant,
    totals_us: [AtomicU64; Metric::COUNT],
    counts: [AtomicU64; Metric::COUNT],
}

static COLLECTOR: OnceLock<Collector> = OnceLock::new();

fn collector() -> &'static Collector {
    COLLECTOR.get_or_init(|| Collector {
        start: Instant::now(),
        totals_us: std::array::from_fn(|_| AtomicU64::new(0)),
        counts: std::array::from_fn(|_| AtomicU64::new(0)),
    })
}

/// RAII timer that records its elapsed time on drop.
pub struct PerfSpan {
    metric: Metric,
    start: Instant,
}

impl Drop for PerfSpan {
    fn drop(&mut self) {
        add_duration(self.metric, self.start.elapsed());
    }
}

/// Begin timing `metric`.
pub fn span(metric: Metric) -> PerfSpan {
    PerfSpan {
        metric,
        start: Instant::now(),
    }
}

/// Record one occurrence of `metric` lasting `duration`.
pub fn add_duration(metric: Metric, duration: Duration) {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    let c = collector();
    c.totals_us[metric.index()].fetch_add(micros, Ordering::Relaxed);
    c.counts[metric.index()].fetch_add(1, Ordering::Relaxed);
}

/// Add `delta` to a counter metric.
pub fn add_count(metric: Metric, delta: u64) {
    collector().counts[metric.index()].fetch_add(delta, Ordering::Relaxed);
}

/// Current value of a metric's count.
pub fn count(metric: Metric) -> u64 {
    collector().counts[metric.index()].load(Ordering::Relaxed)
}

/// Human-readable summary of everything recorded so far.
pub fn report() -> String {
    let c = collector();
    let mut durations = Vec::new();
    let mut counters = Vec::new();
    for (idx, (name, kind)) in METRICS.iter().enumerate() {
        let total = c.totals_us[idx].load(Ordering::Relaxed);
        let count = c.counts[idx].load(Ordering::Relaxed);
        match kind {
            Kind::Duration if count > 0 => durations.push((*name, total, count)),
            Kind::Counter if count > 0 => counters.push((*name, count)),
            _ => {}
        }
    }
    durations.sort_by(|a, b| b.1.cmp(&a.1));
    counters.sort_by(|a, b| b.1.cmp(&a.1));

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Performance summary (uptime: {:.3}s)",
        c.start.elapsed().as_secs_f64()
    );
    if durations.is_empty() && counters.is_empty() {
        let _ = writeln!(out, "No performance data recorded.");
        return out;
    }
    if !durations.is_empty() {
        let _ = writeln!(out, "Durations:");
        let _ = writeln!(out, "  {:<24} {:>10} {:>8} {:>10}", "name", "total", "count", "avg");
        for (name, total_us, count) in durations {
            let avg_ms = total_us as f64 / count as f64 / 1000.0;
            let _ = writeln!(
                out,
                "  {:<24} {:>10.3}s {:>8} {:>10.3}ms",
                name,
                total_us as f64 / 1_000_000.0,
                count,
                avg_ms
            );
        }
    }
    if !counters.is_empty() {
        let _ = writeln!(out, "Counters:");
        for (name, value) in counters {
            let _ = writeln!(out, "  {name:<24} {value}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_and_counters_show_up_in_report() {
        {
            let _span = span(Metric::CheckpointLoad);
        }
        add_count(Metric::DroppedExamples, 2);
        assert!(count(Metric::DroppedExamples) >= 2);
        let text = report();
        assert!(text.contains("checkpoint.load"));
        assert!(text.contains("data.dropped"));
    }
}
