/*
 * Per-provider circuit breaker: three-state lifecycle (Closed / Open / HalfOpen)
 * over a rolling failure window, with the call-site timeout and an injectable
 * time source.
 * I'm implementing resilient outbound-call protection so one degraded provider
 * cannot cascade into the rest of the service.
 *
 * The rolling window is 60 s split into 6 buckets of 10 s. Statistics are only
 * consulted once at least `volume_threshold` calls completed inside the window.
 * User-caused errors (BadRequest) are never counted. State transitions are
 * serialized behind a single mutex per breaker instance.
 */

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::providers::ProviderError;
use crate::utils::error::AppError;
use crate::utils::metrics::MetricsCollector;

/// Injectable time source
/// I'm providing this seam so tests can drive window rotation and reset timing
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests
/// I'm providing deterministic time control for breaker lifecycle tests
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Hard deadline applied to the wrapped call.
    pub timeout: Duration,
    pub rolling_window: Duration,
    pub bucket_count: usize,
    /// Completed calls required in the window before statistics are consulted.
    pub volume_threshold: u32,
    pub error_threshold_pct: u8,
    /// Time spent in Open before a trial call is admitted.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2_500),
            rolling_window: Duration::from_secs(60),
            bucket_count: 6,
            volume_threshold: 5,
            error_threshold_pct: 50,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Result of a breaker-wrapped call.
#[derive(Debug)]
pub enum BreakerCallError {
    /// The breaker is shedding load; the provider was not invoked.
    Open { provider: String },
    /// The provider was invoked and failed.
    Provider(ProviderError),
}

impl From<BreakerCallError> for AppError {
    fn from(err: BreakerCallError) -> Self {
        match err {
            BreakerCallError::Open { provider } => AppError::BreakerOpen(provider),
            BreakerCallError::Provider(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    successes: u32,
    failures: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    opened_at: Option<Instant>,
    half_open_inflight: bool,
    buckets: Vec<Bucket>,
    current_bucket: usize,
    last_rotation: Instant,
}

impl BreakerInner {
    fn completed(&self) -> u32 {
        self.buckets.iter().map(|b| b.successes + b.failures).sum()
    }

    fn failures(&self) -> u32 {
        self.buckets.iter().map(|b| b.failures).sum()
    }

    fn reset_window(&mut self, now: Instant) {
        for bucket in &mut self.buckets {
            *bucket = Bucket::default();
        }
        self.current_bucket = 0;
        self.last_rotation = now;
    }
}

/// Circuit breaker wrapping a single provider. Never shared across providers.
/// I'm serializing all state transitions behind one mutex per instance so
/// concurrent callers observing Open never race the provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: BreakerConfig,
        clock: Arc<dyn Clock>,
        metrics: MetricsCollector,
    ) -> Self {
        let now = clock.now();
        let bucket_count = config.bucket_count.max(1);
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                opened_at: None,
                half_open_inflight: false,
                buckets: vec![Bucket::default(); bucket_count],
                current_bucket: 0,
                last_rotation: now,
            }),
            config,
            clock,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current stored state, for health output and metrics.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Run `operation` under the breaker's admission policy and timeout
    /// I'm enforcing the hard deadline here even if the provider's own client
    /// timeout would be higher
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, BreakerCallError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        self.admit()?;

        let result = match tokio::time::timeout(self.config.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.config.timeout.as_millis() as u64)),
        };

        self.record(&result);
        result.map_err(BreakerCallError::Provider)
    }

    /// Admission check
    /// I'm rejecting before the provider is ever invoked when shedding load
    fn admit(&self) -> Result<(), BreakerCallError> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.rotate(&mut inner, now);

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.half_open_inflight = true;
                    Ok(())
                } else {
                    Err(BreakerCallError::Open {
                        provider: self.name.clone(),
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_inflight {
                    // Exactly one trial call is admitted in HalfOpen.
                    Err(BreakerCallError::Open {
                        provider: self.name.clone(),
                    })
                } else {
                    inner.half_open_inflight = true;
                    Ok(())
                }
            }
        }
    }

    fn record<T>(&self, result: &Result<T, ProviderError>) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.rotate(&mut inner, now);

        match result {
            Ok(_) => {
                if inner.state == BreakerState::HalfOpen {
                    inner.half_open_inflight = false;
                    inner.reset_window(now);
                    inner.opened_at = None;
                    self.transition(&mut inner, BreakerState::Closed);
                } else {
                    let index = inner.current_bucket;
                    inner.buckets[index].successes += 1;
                }
            }
            Err(e) if e.counts_as_breaker_failure() => {
                if inner.state == BreakerState::HalfOpen {
                    inner.half_open_inflight = false;
                    inner.opened_at = Some(now);
                    self.transition(&mut inner, BreakerState::Open);
                } else {
                    let index = inner.current_bucket;
                    inner.buckets[index].failures += 1;
                    self.evaluate(&mut inner, now);
                }
            }
            Err(_) => {
                // User-caused error: does not count as a completed call. A trial
                // slot is released so the next caller can still probe.
                if inner.state == BreakerState::HalfOpen {
                    inner.half_open_inflight = false;
                }
            }
        }
    }

    /// Trip check, consulted only in Closed once the volume threshold is met
    /// I'm ignoring the failure ratio below the threshold so a cold window
    /// cannot trip on a single error
    fn evaluate(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state != BreakerState::Closed {
            return;
        }

        let completed = inner.completed();
        if completed < self.config.volume_threshold {
            return;
        }

        let failure_pct = inner.failures() as u64 * 100 / completed as u64;
        if failure_pct >= self.config.error_threshold_pct as u64 {
            inner.opened_at = Some(now);
            self.transition(inner, BreakerState::Open);
        }
    }

    /// Advance the rolling window, zeroing buckets that fell out of it
    /// I'm rotating lazily on access instead of running a timer task
    fn rotate(&self, inner: &mut BreakerInner, now: Instant) {
        let bucket_width = self.config.rolling_window / self.config.bucket_count as u32;
        if bucket_width.is_zero() {
            return;
        }

        let elapsed = now.saturating_duration_since(inner.last_rotation);
        let steps = (elapsed.as_millis() / bucket_width.as_millis()) as usize;

        if steps == 0 {
            return;
        }
        if steps >= inner.buckets.len() {
            inner.reset_window(now);
            return;
        }

        for _ in 0..steps {
            inner.current_bucket = (inner.current_bucket + 1) % inner.buckets.len();
            let index = inner.current_bucket;
            inner.buckets[index] = Bucket::default();
        }
        inner.last_rotation += bucket_width * steps as u32;
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        match to {
            BreakerState::Open => warn!(
                breaker = %self.name,
                "circuit breaker {} -> {}", from.as_str(), to.as_str()
            ),
            _ => info!(
                breaker = %self.name,
                "circuit breaker {} -> {}", from.as_str(), to.as_str()
            ),
        }
        self.metrics.record_breaker_state(&self.name, to.as_str());
    }
}

/// Process-wide registry of breakers, one per provider name
/// I'm providing centralized breaker management so counters are never shared
/// across providers
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>, metrics: MetricsCollector) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            config,
            clock,
            metrics,
        }
    }

    pub fn get_or_create(&self, provider: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    provider,
                    self.config.clone(),
                    Arc::clone(&self.clock),
                    self.metrics.clone(),
                ))
            })
            .clone()
    }

    /// Snapshot of all breaker states, for the health endpoint.
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn test_breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(
            "primary",
            BreakerConfig::default(),
            clock,
            MetricsCollector::new(),
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerCallError> {
        breaker
            .call(|| async {
                Err::<(), _>(ProviderError::ServerError {
                    status: 503,
                    message: "down".into(),
                })
            })
            .await
            .map(|_| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerCallError> {
        breaker.call(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_stays_closed_below_volume_threshold() {
        let clock = Arc::new(ManualClock::new());
        let breaker = test_breaker(Arc::clone(&clock));

        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }

        // 4 completed calls, 100% failures, still below the volume threshold.
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_opens_at_error_threshold() {
        let clock = Arc::new(ManualClock::new());
        let breaker = test_breaker(Arc::clone(&clock));

        for _ in 0..3 {
            let _ = succeed(&breaker).await;
        }
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        // 6 completed, 3 failures = 50% >= threshold.
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking_provider() {
        let clock = Arc::new(ManualClock::new());
        let breaker = test_breaker(Arc::clone(&clock));

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .call(|| {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok::<(), ProviderError>(()) }
            })
            .await;

        assert!(matches!(result, Err(BreakerCallError::Open { .. })));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let clock = Arc::new(ManualClock::new());
        let breaker = test_breaker(Arc::clone(&clock));

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        clock.advance(Duration::from_secs(31));
        assert_ok!(succeed(&breaker).await);

        assert_eq!(breaker.state(), BreakerState::Closed);

        // Window was reset: old failures no longer count.
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens() {
        let clock = Arc::new(ManualClock::new());
        let breaker = test_breaker(Arc::clone(&clock));

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        clock.advance(Duration::from_secs(31));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        // The reset timer restarted on re-open.
        clock.advance(Duration::from_secs(10));
        let result = succeed(&breaker).await;
        assert!(matches!(result, Err(BreakerCallError::Open { .. })));
    }

    #[tokio::test]
    async fn test_half_open_admits_exactly_one_trial() {
        let clock = Arc::new(ManualClock::new());
        let breaker = Arc::new(test_breaker(Arc::clone(&clock)));

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        clock.advance(Duration::from_secs(31));

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel();

        let trial_breaker = Arc::clone(&breaker);
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(|| async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok::<(), ProviderError>(())
                })
                .await
        });

        started_rx.await.unwrap();

        // Second caller while the trial is in flight is rejected.
        let second = succeed(&breaker).await;
        assert!(matches!(second, Err(BreakerCallError::Open { .. })));

        release_tx.send(()).unwrap();
        assert_ok!(trial.await.unwrap());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_bad_request_does_not_trip_breaker() {
        let clock = Arc::new(ManualClock::new());
        let breaker = test_breaker(Arc::clone(&clock));

        for _ in 0..10 {
            let _ = breaker
                .call(|| async {
                    Err::<(), _>(ProviderError::BadRequest {
                        status: 400,
                        message: "bad query".into(),
                    })
                })
                .await;
        }

        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_window_rotation_forgets_old_failures() {
        let clock = Arc::new(ManualClock::new());
        let breaker = test_breaker(Arc::clone(&clock));

        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }

        // Let the whole window elapse; old failures rotate out.
        clock.advance(Duration::from_secs(61));
        let _ = fail(&breaker).await;

        // Only 1 completed call in the current window: below volume threshold.
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_call_timeout_is_classified_and_counted() {
        let clock = Arc::new(ManualClock::new());
        let config = BreakerConfig {
            timeout: Duration::from_millis(20),
            ..BreakerConfig::default()
        };
        let breaker = CircuitBreaker::new("primary", config, clock, MetricsCollector::new());

        let result = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), ProviderError>(())
            })
            .await;

        match result {
            Err(BreakerCallError::Provider(ProviderError::Timeout(_))) => {}
            other => panic!("expected timeout, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_registry_returns_same_instance_per_provider() {
        let registry = BreakerRegistry::new(
            BreakerConfig::default(),
            Arc::new(SystemClock),
            MetricsCollector::new(),
        );

        let a = registry.get_or_create("primary");
        let b = registry.get_or_create("primary");
        let c = registry.get_or_create("secondary");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
