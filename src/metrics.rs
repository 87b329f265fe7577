//! Per-call usage metrics.
//!
//! The recorder keeps a sliding window of the most recent samples (oldest
//! dropped first) and derives statistics from it on demand. Recording is a
//! no-op while the recorder is disabled.
//!
//! Endpoints are normalized before they are stored so that calls for different
//! tags or ids group together:
//!
//! ```
//! use cocapi::metrics::normalize_endpoint;
//!
//! assert_eq!(normalize_endpoint("/clans/%23ABC123/members"), "/clans/%23{tag}/members");
//! assert_eq!(normalize_endpoint("/locations/32000006/rankings/clans"), "/locations/{id}/rankings/clans");
//! ```

use crate::cache::round2;
use crate::error::ErrorKind;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Header line of [`MetricsRecorder::export_csv`].
pub const CSV_HEADER: &str = "endpoint,method,status_code,response_time,timestamp,cache_hit,error_type";

const TOP_ENDPOINTS: usize = 5;

/// One recorded call attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMetric {
    /// Normalized endpoint path
    pub endpoint: String,
    pub method: String,
    /// Final status code, or 0 if no response was received
    pub status_code: u16,
    /// Time since the logical call started
    pub response_time: Duration,
    pub timestamp: SystemTime,
    pub cache_hit: bool,
    pub error_type: Option<ErrorKind>,
}

impl RequestMetric {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    fn is_error(&self) -> bool {
        self.status_code >= 400 || self.error_type.is_some()
    }

    fn epoch_secs(&self) -> f64 {
        epoch_secs(self.timestamp)
    }
}

/// Elapsed-time percentiles in seconds, linearly interpolated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
}

impl Percentiles {
    /// Computes percentiles over an ascending-sorted sample. `None` if empty.
    fn from_sorted(values: &[f64]) -> Option<Self> {
        let (first, last) = (values.first()?, values.last()?);
        Some(Self {
            p50: round3(percentile(values, 0.50)),
            p75: round3(percentile(values, 0.75)),
            p90: round3(percentile(values, 0.90)),
            p95: round3(percentile(values, 0.95)),
            p99: round3(percentile(values, 0.99)),
            min: round3(*first),
            max: round3(*last),
        })
    }
}

/// First and last sample timestamps, in seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timespan {
    pub start: f64,
    pub end: f64,
    pub duration_seconds: f64,
}

/// Statistics over every sample in the window.
///
/// Rates are percentages rounded to two decimals; times are seconds rounded to
/// three decimals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_requests: usize,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub average_response_time: f64,
    pub response_time_percentiles: Option<Percentiles>,
    /// Up to five endpoints, most called first
    pub most_used_endpoints: Vec<(String, usize)>,
    pub status_code_breakdown: BTreeMap<u16, usize>,
    pub error_breakdown: BTreeMap<ErrorKind, usize>,
    pub timespan: Option<Timespan>,
}

/// Statistics scoped to one normalized endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointMetrics {
    /// The endpoint as queried
    pub endpoint: String,
    pub formatted_endpoint: String,
    pub total_requests: usize,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub average_response_time: f64,
    pub response_time_percentiles: Option<Percentiles>,
}

/// A failed sample as reported by [`MetricsRecorder::recent_errors`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentError {
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub error_type: Option<ErrorKind>,
    pub response_time: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightCategory {
    Performance,
    Reliability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Medium,
    High,
}

/// What an insight is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightTopic {
    LowCacheHitRate,
    HighCacheHitRate,
    LowSuccessRate,
    SlowResponses,
    FrequentErrors,
}

impl InsightTopic {
    fn category(self) -> InsightCategory {
        match self {
            InsightTopic::LowCacheHitRate
            | InsightTopic::HighCacheHitRate
            | InsightTopic::SlowResponses => InsightCategory::Performance,
            InsightTopic::LowSuccessRate | InsightTopic::FrequentErrors => {
                InsightCategory::Reliability
            }
        }
    }

    fn recommendation(self) -> Option<&'static str> {
        match self {
            InsightTopic::LowCacheHitRate => {
                Some("Consider increasing cache TTL or enabling caching if disabled")
            }
            InsightTopic::HighCacheHitRate => None,
            InsightTopic::SlowResponses => {
                Some("Review API call patterns and consider request batching")
            }
            InsightTopic::LowSuccessRate => Some("Implement retry logic for transient failures"),
            InsightTopic::FrequentErrors => {
                Some("Add error handling and monitoring for frequent error types")
            }
        }
    }
}

/// An advisory observation derived from a [`MetricsSummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub topic: InsightTopic,
    pub category: InsightCategory,
    pub severity: Severity,
    pub message: String,
}

impl Insight {
    fn new(topic: InsightTopic, severity: Severity, message: String) -> Self {
        Self {
            topic,
            category: topic.category(),
            severity,
            message,
        }
    }
}

/// Insights plus the recommendations they imply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub insights: Vec<Insight>,
    pub recommendations: Vec<String>,
}

/// Derives insights from a summary. Has no effect on request handling.
pub fn insights(summary: &MetricsSummary) -> PerformanceReport {
    let mut insights = Vec::new();

    if summary.cache_hit_rate < 30.0 {
        insights.push(Insight::new(
            InsightTopic::LowCacheHitRate,
            Severity::Medium,
            format!(
                "Low cache hit rate ({}%). Consider increasing cache TTL or reviewing caching strategy.",
                summary.cache_hit_rate
            ),
        ));
    } else if summary.cache_hit_rate > 80.0 {
        insights.push(Insight::new(
            InsightTopic::HighCacheHitRate,
            Severity::Info,
            format!("Excellent cache hit rate ({}%)!", summary.cache_hit_rate),
        ));
    }

    if summary.success_rate < 95.0 {
        let severity = if summary.success_rate < 90.0 {
            Severity::High
        } else {
            Severity::Medium
        };
        insights.push(Insight::new(
            InsightTopic::LowSuccessRate,
            severity,
            format!(
                "Success rate is {}%. Review error patterns.",
                summary.success_rate
            ),
        ));
    }

    if summary.average_response_time > 2.0 {
        insights.push(Insight::new(
            InsightTopic::SlowResponses,
            Severity::Medium,
            format!(
                "High average response time ({}s). Consider optimizing requests.",
                summary.average_response_time
            ),
        ));
    }

    let most_common = summary
        .error_breakdown
        .iter()
        .max_by_key(|(_, count)| **count);
    if let Some((kind, count)) = most_common {
        if *count as f64 > summary.total_requests as f64 * 0.1 {
            insights.push(Insight::new(
                InsightTopic::FrequentErrors,
                Severity::High,
                format!(
                    "Frequent {} errors ({} occurrences). Investigate root cause.",
                    kind, count
                ),
            ));
        }
    }

    let mut recommendations: Vec<String> = insights
        .iter()
        .filter_map(|insight| insight.topic.recommendation())
        .map(str::to_string)
        .collect();
    if recommendations.is_empty() {
        recommendations.push("Monitor metrics regularly for performance trends".to_string());
    }

    PerformanceReport {
        insights,
        recommendations,
    }
}

/// Bounded in-memory store of request metrics, shared by every call of one client.
#[derive(Debug)]
pub struct MetricsRecorder {
    enabled: AtomicBool,
    max_metrics: usize,
    samples: Mutex<VecDeque<RequestMetric>>,
}

impl MetricsRecorder {
    /// Creates a recorder keeping at most `max_metrics` samples.
    pub fn new(max_metrics: usize, enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            max_metrics: max_metrics.max(1),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Records one sample. The endpoint is normalized first.
    pub fn record(
        &self,
        endpoint: &str,
        method: &str,
        status_code: u16,
        response_time: Duration,
        cache_hit: bool,
        error_type: Option<ErrorKind>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let metric = RequestMetric {
            endpoint: normalize_endpoint(endpoint),
            method: method.to_string(),
            status_code,
            response_time,
            timestamp: SystemTime::now(),
            cache_hit,
            error_type,
        };

        let mut samples = self.lock();
        samples.push_back(metric);
        while samples.len() > self.max_metrics {
            samples.pop_front();
        }
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copies out the current window, oldest first.
    pub fn samples(&self) -> Vec<RequestMetric> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Statistics over the whole window. All zeroes when no samples exist.
    pub fn summary(&self) -> MetricsSummary {
        let samples = self.lock();
        let total = samples.len();
        if total == 0 {
            return MetricsSummary::default();
        }

        let (success_rate, cache_hit_rate, average_response_time, percentiles) =
            rates(samples.iter());

        let mut endpoint_counts: HashMap<&str, usize> = HashMap::new();
        let mut status_code_breakdown = BTreeMap::new();
        let mut error_breakdown = BTreeMap::new();
        for metric in samples.iter() {
            *endpoint_counts.entry(metric.endpoint.as_str()).or_default() += 1;
            *status_code_breakdown.entry(metric.status_code).or_default() += 1;
            if let Some(kind) = metric.error_type {
                *error_breakdown.entry(kind).or_default() += 1;
            }
        }

        let mut most_used_endpoints: Vec<(String, usize)> = endpoint_counts
            .into_iter()
            .map(|(endpoint, count)| (endpoint.to_string(), count))
            .collect();
        most_used_endpoints.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_used_endpoints.truncate(TOP_ENDPOINTS);

        let start = samples
            .iter()
            .map(RequestMetric::epoch_secs)
            .fold(f64::INFINITY, f64::min);
        let end = samples
            .iter()
            .map(RequestMetric::epoch_secs)
            .fold(f64::NEG_INFINITY, f64::max);

        MetricsSummary {
            total_requests: total,
            success_rate,
            cache_hit_rate,
            average_response_time,
            response_time_percentiles: percentiles,
            most_used_endpoints,
            status_code_breakdown,
            error_breakdown,
            timespan: Some(Timespan {
                start,
                end,
                duration_seconds: end - start,
            }),
        }
    }

    /// Statistics for one endpoint, or `None` if it has no samples.
    pub fn per_endpoint(&self, endpoint: &str) -> Option<EndpointMetrics> {
        let formatted = normalize_endpoint(endpoint);
        let samples = self.lock();
        let matching: Vec<&RequestMetric> = samples
            .iter()
            .filter(|metric| metric.endpoint == formatted)
            .collect();
        if matching.is_empty() {
            return None;
        }

        let (success_rate, cache_hit_rate, average_response_time, percentiles) =
            rates(matching.iter().copied());

        Some(EndpointMetrics {
            endpoint: endpoint.to_string(),
            formatted_endpoint: formatted,
            total_requests: matching.len(),
            success_rate,
            cache_hit_rate,
            average_response_time,
            response_time_percentiles: percentiles,
        })
    }

    /// Failed samples, newest first.
    pub fn recent_errors(&self, limit: usize) -> Vec<RecentError> {
        self.lock()
            .iter()
            .rev()
            .filter(|metric| metric.is_error())
            .take(limit)
            .map(|metric| RecentError {
                endpoint: metric.endpoint.clone(),
                method: metric.method.clone(),
                status_code: metric.status_code,
                error_type: metric.error_type,
                response_time: metric.response_time.as_secs_f64(),
                timestamp: metric.epoch_secs(),
            })
            .collect()
    }

    /// Renders the window as CSV, oldest first, headed by [`CSV_HEADER`].
    pub fn export_csv(&self) -> String {
        let samples = self.lock();
        let mut csv = String::from(CSV_HEADER);
        for metric in samples.iter() {
            let _ = write!(
                csv,
                "\n{},{},{},{},{},{},{}",
                metric.endpoint,
                metric.method,
                metric.status_code,
                metric.response_time.as_secs_f64(),
                metric.epoch_secs(),
                metric.cache_hit,
                metric.error_type.map(|kind| kind.as_str()).unwrap_or_default()
            );
        }
        csv
    }

    /// Insights over the current window, or `None` when nothing was recorded.
    pub fn insights(&self) -> Option<PerformanceReport> {
        if self.is_empty() {
            return None;
        }
        Some(insights(&self.summary()))
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RequestMetric>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Replaces tag and id path segments with placeholders.
///
/// A segment starting with `%23` followed by uppercase letters or digits has
/// that run replaced by `%23{tag}`; a segment starting with digits has the
/// digit run replaced by `{id}`. The rest of the segment is kept.
pub fn normalize_endpoint(endpoint: &str) -> String {
    endpoint
        .split('/')
        .map(|segment| {
            if let Some(rest) = segment.strip_prefix("%23") {
                let run = rest
                    .bytes()
                    .take_while(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
                    .count();
                if run > 0 {
                    return format!("%23{{tag}}{}", &rest[run..]);
                }
            }
            let digits = segment.bytes().take_while(u8::is_ascii_digit).count();
            if digits > 0 {
                return format!("{{id}}{}", &segment[digits..]);
            }
            segment.to_string()
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn rates<'a>(
    samples: impl Iterator<Item = &'a RequestMetric>,
) -> (f64, f64, f64, Option<Percentiles>) {
    let mut total = 0usize;
    let mut successes = 0usize;
    let mut hits = 0usize;
    let mut times = Vec::new();

    for metric in samples {
        total += 1;
        successes += usize::from(metric.is_success());
        hits += usize::from(metric.cache_hit);
        times.push(metric.response_time.as_secs_f64());
    }
    if total == 0 {
        return (0.0, 0.0, 0.0, None);
    }

    let average = times.iter().sum::<f64>() / total as f64;
    times.sort_by(f64::total_cmp);

    (
        round2(successes as f64 / total as f64 * 100.0),
        round2(hits as f64 / total as f64 * 100.0),
        round3(average),
        Percentiles::from_sorted(&times),
    )
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let k = (sorted.len() - 1) as f64 * p;
    let floor = k.floor() as usize;
    let fraction = k - floor as f64;
    match sorted.get(floor + 1) {
        Some(next) => sorted[floor] * (1.0 - fraction) + next * fraction,
        None => sorted[floor],
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn epoch_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
