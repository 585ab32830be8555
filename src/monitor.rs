//! Rolling per-call performance tracking
//!
//! Every call outcome lands in a bounded window keyed by (provider, task).
//! Scores derived from the windows drive primary switching; they never
//! influence failover.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PerformanceConfig;
use crate::providers::TaskType;

/// Weight of the success rate in a score
const SUCCESS_WEIGHT: f64 = 3.0;

/// Weight of the latency component in a score
const LATENCY_WEIGHT: f64 = 2.0;

/// One recorded call outcome
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSample {
    pub provider: String,
    pub task: TaskType,
    pub at: DateTime<Utc>,
    pub latency_ms: u64,
    pub success: bool,
    pub error_kind: Option<String>,
}

/// Derived statistics for one window
#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub provider: String,
    pub task: TaskType,
    pub samples: usize,
    pub capacity: usize,
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: u64,
    pub error_kinds: BTreeMap<String, u64>,
    pub score: Option<f64>,
    /// Mean latency above the slow threshold
    pub slow: bool,
    /// Error rate above the threshold; distinct from hard health failures
    pub unhealthy_by_performance: bool,
    pub last_sample_at: Option<DateTime<Utc>>,
}

/// Serializable export of every window
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub generated_at: DateTime<Utc>,
    pub window_capacity: usize,
    pub slow_threshold_ms: u64,
    pub error_rate_threshold: f64,
    pub total_samples: usize,
    pub total_failures: usize,
    pub windows: Vec<WindowStats>,
    /// Mean score per provider over its task windows
    pub provider_scores: BTreeMap<String, f64>,
}

#[derive(Debug)]
struct Window {
    samples: VecDeque<PerformanceSample>,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, sample: PerformanceSample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }
}

/// Score from a success rate and mean latency
///
/// `3 × success_rate + 2 × (1 − min(avg_latency / slow_threshold, 1))`,
/// within `[0, 5]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score(success_rate: f64, avg_latency_ms: f64, slow_threshold_ms: u64) -> f64 {
    let threshold = slow_threshold_ms.max(1) as f64;
    let normalized_latency = (avg_latency_ms / threshold).clamp(0.0, 1.0);
    SUCCESS_WEIGHT * success_rate.clamp(0.0, 1.0) + LATENCY_WEIGHT * (1.0 - normalized_latency)
}

type WindowKey = (String, TaskType);

/// Per-(provider, task) rolling performance monitor
#[derive(Debug)]
pub struct PerformanceMonitor {
    config: PerformanceConfig,
    windows: RwLock<HashMap<WindowKey, Arc<Mutex<Window>>>>,
}

impl PerformanceMonitor {
    #[must_use]
    pub fn new(config: PerformanceConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Record a call outcome
    pub fn record(
        &self,
        provider: &str,
        task: TaskType,
        latency_ms: u64,
        success: bool,
        error_kind: Option<&str>,
    ) {
        if latency_ms > self.config.slow_threshold_ms {
            tracing::warn!(
                provider,
                task = %task,
                latency_ms,
                threshold_ms = self.config.slow_threshold_ms,
                "slow response"
            );
        }

        let sample = PerformanceSample {
            provider: provider.to_string(),
            task,
            at: Utc::now(),
            latency_ms,
            success,
            error_kind: error_kind.map(String::from),
        };

        let window = self.window_or_insert(provider, task);
        window.lock().unwrap_or_else(|e| e.into_inner()).push(sample);
    }

    fn window_or_insert(&self, provider: &str, task: TaskType) -> Arc<Mutex<Window>> {
        let key = (provider.to_string(), task);
        if let Some(w) = self
            .windows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Arc::clone(w);
        }

        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            windows
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(Window::new(self.config.window)))),
        )
    }

    fn window(&self, provider: &str, task: TaskType) -> Option<Arc<Mutex<Window>>> {
        self.windows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(provider.to_string(), task))
            .cloned()
    }

    /// Score for one (provider, task) window; `None` when empty
    #[must_use]
    pub fn score(&self, provider: &str, task: TaskType) -> Option<f64> {
        self.stats(provider, task).and_then(|s| s.score)
    }

    /// Mean score over the provider's windows that have samples
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn provider_score(&self, provider: &str) -> Option<f64> {
        let scores: Vec<f64> = TaskType::ALL
            .into_iter()
            .filter_map(|task| self.score(provider, task))
            .collect();
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }

    /// Whether any of the provider's windows exceeds the error-rate threshold
    #[must_use]
    pub fn is_unhealthy_by_performance(&self, provider: &str) -> bool {
        TaskType::ALL
            .into_iter()
            .filter_map(|task| self.stats(provider, task))
            .any(|s| s.unhealthy_by_performance)
    }

    /// Samples currently held for a window, oldest first
    #[must_use]
    pub fn samples(&self, provider: &str, task: TaskType) -> Vec<PerformanceSample> {
        self.window(provider, task).map_or_else(Vec::new, |w| {
            w.lock()
                .unwrap_or_else(|e| e.into_inner())
                .samples
                .iter()
                .cloned()
                .collect()
        })
    }

    /// Derived statistics for one window
    #[must_use]
    pub fn stats(&self, provider: &str, task: TaskType) -> Option<WindowStats> {
        let window = self.window(provider, task)?;
        let window = window.lock().unwrap_or_else(|e| e.into_inner());
        Some(self.compute_stats(provider, task, &window))
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn compute_stats(&self, provider: &str, task: TaskType, window: &Window) -> WindowStats {
        let n = window.samples.len();
        let successes = window.samples.iter().filter(|s| s.success).count();

        let mut latencies: Vec<u64> = window.samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_unstable();

        let mut error_kinds = BTreeMap::new();
        for kind in window.samples.iter().filter_map(|s| s.error_kind.as_deref()) {
            *error_kinds.entry(kind.to_string()).or_insert(0u64) += 1;
        }

        let (success_rate, error_rate, avg_latency_ms, p95, score_value) = if n == 0 {
            (0.0, 0.0, 0.0, 0, None)
        } else {
            let success_rate = successes as f64 / n as f64;
            let avg = latencies.iter().sum::<u64>() as f64 / n as f64;
            let p95_idx = ((n as f64 * 0.95).ceil() as usize).clamp(1, n) - 1;
            (
                success_rate,
                1.0 - success_rate,
                avg,
                latencies[p95_idx],
                Some(score(success_rate, avg, self.config.slow_threshold_ms)),
            )
        };

        WindowStats {
            provider: provider.to_string(),
            task,
            samples: n,
            capacity: window.capacity,
            success_rate,
            error_rate,
            avg_latency_ms,
            p95_latency_ms: p95,
            error_kinds,
            score: score_value,
            slow: n > 0 && avg_latency_ms > self.config.slow_threshold_ms as f64,
            unhealthy_by_performance: n > 0 && error_rate > self.config.error_rate_threshold,
            last_sample_at: window.samples.back().map(|s| s.at),
        }
    }

    /// Export every window
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn export(&self) -> PerformanceSnapshot {
        let entries: Vec<(WindowKey, Arc<Mutex<Window>>)> = self
            .windows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let mut windows: Vec<WindowStats> = entries
            .iter()
            .map(|((provider, task), w)| {
                let w = w.lock().unwrap_or_else(|e| e.into_inner());
                self.compute_stats(provider, *task, &w)
            })
            .collect();
        windows.sort_by(|a, b| (&a.provider, a.task).cmp(&(&b.provider, b.task)));

        let total_samples = windows.iter().map(|w| w.samples).sum();
        let total_failures = windows
            .iter()
            .map(|w| w.samples - (w.success_rate * w.samples as f64).round() as usize)
            .sum();

        let provider_scores = windows
            .iter()
            .map(|w| w.provider.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .filter_map(|p| self.provider_score(&p).map(|s| (p, s)))
            .collect();

        PerformanceSnapshot {
            generated_at: Utc::now(),
            window_capacity: self.config.window,
            slow_threshold_ms: self.config.slow_threshold_ms,
            error_rate_threshold: self.config.error_rate_threshold,
            total_samples,
            total_failures,
            windows,
            provider_scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(window: usize) -> PerformanceMonitor {
        PerformanceMonitor::new(PerformanceConfig {
            window,
            ..PerformanceConfig::default()
        })
    }

    #[test]
    fn test_score_formula() {
        assert!((score(1.0, 0.0, 3000) - 5.0).abs() < f64::EPSILON);
        assert!((score(1.0, 1500.0, 3000) - 4.0).abs() < 1e-9);
        assert!((score(0.5, 6000.0, 3000) - 1.5).abs() < 1e-9);
        assert!(score(0.0, 10_000.0, 3000).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_window_has_no_score() {
        let m = monitor(10);
        assert!(m.score("a", TaskType::Chat).is_none());
        assert!(m.provider_score("a").is_none());
    }

    #[test]
    fn test_window_evicts_oldest() {
        let m = monitor(3);
        for latency in [10, 20, 30, 40, 50] {
            m.record("a", TaskType::Chat, latency, true, None);
        }
        let samples = m.samples("a", TaskType::Chat);
        assert_eq!(samples.len(), 3);
        let latencies: Vec<u64> = samples.iter().map(|s| s.latency_ms).collect();
        assert_eq!(latencies, vec![30, 40, 50]);
    }

    #[test]
    fn test_windows_are_per_task() {
        let m = monitor(10);
        m.record("a", TaskType::Chat, 100, true, None);
        m.record("a", TaskType::Code, 100, false, Some("timeout"));
        assert_eq!(m.samples("a", TaskType::Chat).len(), 1);
        let code = m.stats("a", TaskType::Code).unwrap();
        assert_eq!(code.error_kinds["timeout"], 1);
        assert!(code.unhealthy_by_performance);
    }

    #[test]
    fn test_provider_score_is_mean_over_tasks() {
        let m = monitor(10);
        // Chat: all success, zero latency => 5.0
        m.record("a", TaskType::Chat, 0, true, None);
        // Code: all failure, slow => 0.0
        m.record("a", TaskType::Code, 5000, false, Some("http"));
        let s = m.provider_score("a").unwrap();
        assert!((s - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_slow_flag_and_p95() {
        let m = monitor(100);
        for i in 1..=20 {
            m.record("a", TaskType::Chat, i * 200, true, None);
        }
        let stats = m.stats("a", TaskType::Chat).unwrap();
        assert_eq!(stats.p95_latency_ms, 3800);
        assert!(!stats.slow);
        assert!((stats.avg_latency_ms - 2100.0).abs() < 1e-9);
    }

    #[test]
    fn test_export_totals() {
        let m = monitor(10);
        m.record("a", TaskType::Chat, 10, true, None);
        m.record("b", TaskType::Chat, 10, false, Some("timeout"));
        let snap = m.export();
        assert_eq!(snap.total_samples, 2);
        assert_eq!(snap.total_failures, 1);
        assert_eq!(snap.windows[0].provider, "a");
        assert!(snap.provider_scores.contains_key("b"));
    }
}
