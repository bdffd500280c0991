/*
 * Metrics collection for the search and ingestion core: counters, gauges, and latency
 * histograms with percentile summaries and Prometheus text exposition.
 * I'm implementing intelligent metrics aggregation with memory-efficient storage and
 * integration with Prometheus for production monitoring.
 *
 * The metric names emitted here are contractual:
 *   search.cache.hit{layer}, search.cache.miss,
 *   search.provider.latency_ms{provider}, search.provider.errors{provider,kind},
 *   search.breaker.state{provider,state}, search.degraded,
 *   ingestion.duplicate{matchType}, ingestion.created
 */

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Thread-safe metrics collector shared across workers.
/// I'm implementing a metrics collection system that minimizes performance impact.
///
/// Labeled series are keyed by `name{k="v",...}` with labels sorted, so the
/// same label set always maps to the same series.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
    histograms: Mutex<HashMap<String, Histogram>>,
    start_time: Instant,
}

/// Latency histogram keeping a bounded sample reservoir for percentile summaries.
/// I'm implementing memory-efficient histograms that keep only recent samples.
#[derive(Debug, Default)]
struct Histogram {
    samples: Vec<f64>,
    sum: f64,
    count: u64,
}

const HISTOGRAM_MAX_SAMPLES: usize = 1_000;

impl Histogram {
    fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.samples.push(value);
        if self.samples.len() > HISTOGRAM_MAX_SAMPLES {
            // Keep the most recent half once the reservoir fills up.
            self.samples.drain(0..HISTOGRAM_MAX_SAMPLES / 2);
        }
    }

    fn percentile(&self, percentile: f64) -> Option<f64> {
        if self.samples.is_empty() || !(0.0..=100.0).contains(&percentile) {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = (percentile / 100.0 * (sorted.len() - 1) as f64).round() as usize;
        sorted.get(index).copied()
    }

    fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }
}

/// Percentile summary of a latency series.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub average_ms: f64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                counters: Mutex::new(HashMap::new()),
                gauges: Mutex::new(HashMap::new()),
                histograms: Mutex::new(HashMap::new()),
                start_time: Instant::now(),
            }),
        }
    }

    /// Increment a labeled counter by 1.
    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = series_key(name, labels);
        let mut counters = self.inner.counters.lock();
        *counters.entry(key).or_insert(0) += 1;
    }

    /// Set a labeled gauge.
    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = series_key(name, labels);
        let mut gauges = self.inner.gauges.lock();
        gauges.insert(key, value);
    }

    /// Record a value into a labeled histogram.
    pub fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = series_key(name, labels);
        let mut histograms = self.inner.histograms.lock();
        histograms.entry(key).or_default().observe(value);
    }

    // Contract-name helpers used at the call sites of the core.
    // I'm centralizing the contractual metric names so call sites can't drift.

    pub fn record_cache_hit(&self, layer: &str) {
        self.increment_counter("search.cache.hit", &[("layer", layer)]);
    }

    pub fn record_cache_miss(&self) {
        self.increment_counter("search.cache.miss", &[]);
    }

    pub fn record_provider_latency(&self, provider: &str, latency_ms: f64) {
        self.observe_histogram("search.provider.latency_ms", &[("provider", provider)], latency_ms);
    }

    pub fn record_provider_error(&self, provider: &str, kind: &str) {
        self.increment_counter(
            "search.provider.errors",
            &[("provider", provider), ("kind", kind)],
        );
    }

    pub fn record_breaker_state(&self, provider: &str, state: &str) {
        self.increment_counter(
            "search.breaker.state",
            &[("provider", provider), ("state", state)],
        );
        self.set_gauge(
            "search.breaker.state.current",
            &[("provider", provider)],
            breaker_state_value(state),
        );
    }

    pub fn record_degraded(&self) {
        self.increment_counter("search.degraded", &[]);
    }

    pub fn record_ingestion_duplicate(&self, match_type: &str) {
        self.increment_counter("ingestion.duplicate", &[("matchType", match_type)]);
    }

    pub fn record_ingestion_created(&self) {
        self.increment_counter("ingestion.created", &[]);
    }

    /// Counter value for a labeled series
    /// I'm providing counter inspection for tests and health output
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = series_key(name, labels);
        *self.inner.counters.lock().get(&key).unwrap_or(&0)
    }

    /// Latency summary for a provider series
    /// I'm providing percentile statistics for performance analysis
    pub fn provider_latency_summary(&self, provider: &str) -> Option<LatencySummary> {
        let key = series_key("search.provider.latency_ms", &[("provider", provider)]);
        let histograms = self.inner.histograms.lock();
        let histogram = histograms.get(&key)?;
        Some(LatencySummary {
            count: histogram.count,
            average_ms: histogram.average(),
            p50_ms: histogram.percentile(50.0),
            p95_ms: histogram.percentile(95.0),
            p99_ms: histogram.percentile(99.0),
        })
    }

    /// Get all current metrics in Prometheus text exposition format
    /// I'm implementing Prometheus integration for production monitoring
    pub fn prometheus_text(&self) -> String {
        let mut output = String::new();

        let counters = self.inner.counters.lock();
        let mut counter_entries: Vec<_> = counters.iter().collect();
        counter_entries.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in counter_entries {
            output.push_str(&format!("{} {}\n", prometheus_series(key), value));
        }
        drop(counters);

        let gauges = self.inner.gauges.lock();
        let mut gauge_entries: Vec<_> = gauges.iter().collect();
        gauge_entries.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in gauge_entries {
            output.push_str(&format!("{} {}\n", prometheus_series(key), value));
        }
        drop(gauges);

        let histograms = self.inner.histograms.lock();
        let mut histogram_entries: Vec<_> = histograms.iter().collect();
        histogram_entries.sort_by(|a, b| a.0.cmp(b.0));
        for (key, histogram) in histogram_entries {
            let base = prometheus_series(key);
            output.push_str(&format!("{}_count {}\n", base, histogram.count));
            output.push_str(&format!("{}_sum {}\n", base, histogram.sum));
            for (quantile, value) in [
                ("0.5", histogram.percentile(50.0)),
                ("0.95", histogram.percentile(95.0)),
                ("0.99", histogram.percentile(99.0)),
            ] {
                if let Some(value) = value {
                    output.push_str(&format!(
                        "{} {}\n",
                        prometheus_series_with(key, "quantile", quantile),
                        value
                    ));
                }
            }
        }

        output.push_str(&format!(
            "process_uptime_seconds {}\n",
            self.inner.start_time.elapsed().as_secs()
        ));

        output
    }

    /// Get metrics summary as JSON
    /// I'm providing structured metrics data for API consumption
    pub fn summary_json(&self) -> serde_json::Value {
        let counters = self.inner.counters.lock().clone();
        let gauges = self.inner.gauges.lock().clone();

        serde_json::json!({
            "counters": counters,
            "gauges": gauges,
            "uptime_seconds": self.inner.start_time.elapsed().as_secs(),
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn breaker_state_value(state: &str) -> f64 {
    match state {
        "closed" => 0.0,
        "half_open" => 1.0,
        "open" => 2.0,
        _ => -1.0,
    }
}

/// Build the canonical series key `name{k="v",...}` with sorted labels
/// I'm sorting labels so the same label set always maps to one series
fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let sorted: BTreeMap<&str, &str> = labels.iter().copied().collect();
    let rendered: Vec<String> = sorted
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect();
    format!("{}{{{}}}", name, rendered.join(","))
}

/// Prometheus forbids dots in metric names; the series key keeps the contractual
/// dotted name and the exposition layer rewrites it.
fn prometheus_series(key: &str) -> String {
    match key.find('{') {
        Some(pos) => format!("{}{}", key[..pos].replace('.', "_"), &key[pos..]),
        None => key.replace('.', "_"),
    }
}

fn prometheus_series_with(key: &str, label: &str, value: &str) -> String {
    let base = prometheus_series(key);
    match base.find('{') {
        Some(pos) => {
            let (name, rest) = base.split_at(pos);
            let inner = rest.trim_start_matches('{').trim_end_matches('}');
            format!("{}{{{},{}=\"{}\"}}", name, inner, label, value)
        }
        None => format!("{}{{{}=\"{}\"}}", base, label, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_series_are_label_order_independent() {
        let metrics = MetricsCollector::new();

        metrics.increment_counter("search.provider.errors", &[("provider", "primary"), ("kind", "timeout")]);
        metrics.increment_counter("search.provider.errors", &[("kind", "timeout"), ("provider", "primary")]);

        assert_eq!(
            metrics.counter_value(
                "search.provider.errors",
                &[("provider", "primary"), ("kind", "timeout")]
            ),
            2
        );
    }

    #[test]
    fn test_cache_hit_layers_are_distinct_series() {
        let metrics = MetricsCollector::new();

        metrics.record_cache_hit("l1");
        metrics.record_cache_hit("l1");
        metrics.record_cache_hit("l2");
        metrics.record_cache_miss();

        assert_eq!(metrics.counter_value("search.cache.hit", &[("layer", "l1")]), 2);
        assert_eq!(metrics.counter_value("search.cache.hit", &[("layer", "l2")]), 1);
        assert_eq!(metrics.counter_value("search.cache.miss", &[]), 1);
    }

    #[test]
    fn test_latency_summary_percentiles() {
        let metrics = MetricsCollector::new();

        for latency in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0] {
            metrics.record_provider_latency("primary", latency);
        }

        let summary = metrics.provider_latency_summary("primary").unwrap();
        assert_eq!(summary.count, 10);
        assert!(summary.average_ms > 50.0 && summary.average_ms < 60.0);
        assert_eq!(summary.p50_ms, Some(60.0));
        assert_eq!(summary.p99_ms, Some(100.0));
    }

    #[test]
    fn test_prometheus_text_rewrites_dotted_names() {
        let metrics = MetricsCollector::new();
        metrics.record_cache_miss();
        metrics.record_breaker_state("primary", "open");

        let text = metrics.prometheus_text();
        assert!(text.contains("search_cache_miss 1"));
        assert!(text.contains("search_breaker_state{provider=\"primary\",state=\"open\"} 1"));
        assert!(!text.contains("search.cache.miss"));
    }
}
