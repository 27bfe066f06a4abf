//! Run KPIs over a window of stored runs.
//!
//! Aggregates the metrics recorded on each run: latency percentiles,
//! mean confidence, parse success rate and a confidence histogram.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::alerts::metric;
use crate::types::Run;

pub const DEFAULT_RANGE_DAYS: u32 = 7;
pub const CONFIDENCE_BINS: usize = 10;

/// Days covered by a range label (`24h`, `7d`, `30d`, `90d`). Unknown labels
/// fall back to a week.
pub fn range_days(label: &str) -> u32 {
    match label {
        "24h" => 1,
        "7d" => 7,
        "30d" => 30,
        "90d" => 90,
        _ => DEFAULT_RANGE_DAYS,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunKpis {
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub avg_confidence: f64,
    pub parse_success_rate: f64,
    pub run_count: usize,
    /// Distinct models recorded in run params, sorted
    pub models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBin {
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

fn finite_values<'a>(runs: &'a [Run], name: &'a str) -> impl Iterator<Item = f64> + 'a {
    runs.iter()
        .filter_map(move |r| r.metric(name))
        .filter(|v| v.is_finite())
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// KPI summary of `runs`.
///
/// Percentiles use the nearest-rank index `floor(q * n)`, clamped to the last
/// sample. When no run recorded a latency every KPI is zero.
pub fn metrics_summary(runs: &[Run]) -> RunKpis {
    let mut latencies: Vec<f64> = finite_values(runs, metric::LATENCY_MS).collect();
    if latencies.is_empty() {
        return RunKpis::default();
    }
    latencies.sort_by(f64::total_cmp);

    let n = latencies.len();
    let at = |q: f64| latencies[((q * n as f64) as usize).min(n - 1)];

    let confidences: Vec<f64> = finite_values(runs, metric::CONFIDENCE).collect();
    let parses: Vec<f64> = finite_values(runs, metric::PARSE_SUCCESS).collect();
    let models: BTreeSet<String> = runs
        .iter()
        .filter_map(|r| r.params.get("model").and_then(|m| m.as_str()))
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect();

    RunKpis {
        p50_latency_ms: at(0.5),
        p95_latency_ms: at(0.95),
        avg_confidence: round3(mean(&confidences)),
        parse_success_rate: round3(mean(&parses)),
        run_count: runs.len(),
        models: models.into_iter().collect(),
    }
}

/// Ten equal-width bins over `[0, 1]`. Values are clamped into range and a
/// confidence of exactly 1.0 lands in the last bin.
pub fn confidence_distribution(runs: &[Run]) -> Vec<ConfidenceBin> {
    let mut counts = [0usize; CONFIDENCE_BINS];
    for value in finite_values(runs, metric::CONFIDENCE) {
        let idx = (value.clamp(0.0, 1.0) * CONFIDENCE_BINS as f64) as usize;
        counts[idx.min(CONFIDENCE_BINS - 1)] += 1;
    }
    counts
        .iter()
        .enumerate()
        .map(|(i, &count)| ConfidenceBin {
            min: i as f64 / CONFIDENCE_BINS as f64,
            max: (i + 1) as f64 / CONFIDENCE_BINS as f64,
            count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run_with(id: &str, metrics: &[(&str, f64)]) -> Run {
        let mut run = Run::new(id);
        for (k, v) in metrics {
            run.metrics.insert(k.to_string(), *v);
        }
        run
    }

    fn latency_runs(latencies: &[f64]) -> Vec<Run> {
        latencies
            .iter()
            .enumerate()
            .map(|(i, l)| run_with(&format!("r{}", i), &[(metric::LATENCY_MS, *l)]))
            .collect()
    }

    #[test]
    fn test_empty_range_is_all_zero() {
        assert_eq!(metrics_summary(&[]), RunKpis::default());

        // Runs without latency count as empty too
        let runs = vec![run_with("r1", &[(metric::CONFIDENCE, 0.8)])];
        let kpis = metrics_summary(&runs);
        assert_eq!(kpis.run_count, 0);
        assert_eq!(kpis.avg_confidence, 0.0);
    }

    #[test]
    fn test_percentiles_use_clamped_rank() {
        let runs = latency_runs(&[400.0, 100.0, 300.0, 200.0]);
        let kpis = metrics_summary(&runs);
        // n = 4: p50 index 2, p95 index floor(3.8) = 3
        assert_eq!(kpis.p50_latency_ms, 300.0);
        assert_eq!(kpis.p95_latency_ms, 400.0);

        // n = 1: floor(0.95) = 0
        let kpis = metrics_summary(&latency_runs(&[250.0]));
        assert_eq!(kpis.p50_latency_ms, 250.0);
        assert_eq!(kpis.p95_latency_ms, 250.0);

        // n = 20: floor(19.0) = 19, the last sample
        let many: Vec<f64> = (1..=20).map(|i| i as f64 * 10.0).collect();
        assert_eq!(metrics_summary(&latency_runs(&many)).p95_latency_ms, 200.0);
    }

    #[test]
    fn test_summary_averages() {
        let mut runs = vec![
            run_with(
                "r1",
                &[
                    (metric::LATENCY_MS, 120.0),
                    (metric::CONFIDENCE, 0.91),
                    (metric::PARSE_SUCCESS, 1.0),
                ],
            ),
            run_with(
                "r2",
                &[
                    (metric::LATENCY_MS, 80.0),
                    (metric::CONFIDENCE, 0.42),
                    (metric::PARSE_SUCCESS, 0.0),
                ],
            ),
            run_with("r3", &[(metric::PARSE_SUCCESS, 1.0)]),
        ];
        runs[0].params.insert("model".into(), json!("gpt-4o"));
        runs[1].params.insert("model".into(), json!("claude"));
        runs[2].params.insert("model".into(), json!("gpt-4o"));

        let kpis = metrics_summary(&runs);
        assert_eq!(kpis.run_count, 3);
        assert_eq!(kpis.avg_confidence, 0.665);
        assert_eq!(kpis.parse_success_rate, 0.667);
        assert_eq!(kpis.models, vec!["claude", "gpt-4o"]);
    }

    #[test]
    fn test_distribution_clamps_into_last_bin() {
        let runs: Vec<Run> = [0.0, 0.05, 0.55, 1.0, 1.7, -0.2]
            .iter()
            .enumerate()
            .map(|(i, c)| run_with(&format!("r{}", i), &[(metric::CONFIDENCE, *c)]))
            .collect();
        let bins = confidence_distribution(&runs);

        assert_eq!(bins.len(), CONFIDENCE_BINS);
        assert_eq!(bins[0].count, 3);
        assert_eq!(bins[5].count, 1);
        assert_eq!(bins[9].count, 2);
        assert_eq!(bins[9].min, 0.9);
        assert_eq!(bins[9].max, 1.0);
    }

    #[test]
    fn test_range_labels() {
        assert_eq!(range_days("24h"), 1);
        assert_eq!(range_days("90d"), 90);
        assert_eq!(range_days("1y"), DEFAULT_RANGE_DAYS);
    }
}
