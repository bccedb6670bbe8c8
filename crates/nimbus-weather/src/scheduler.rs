//! Periodic update loop.
//!
//! One task owns the [`UpdateState`] and runs the tick cycle:
//! indicator grace period, connectivity probe, fetch or fallback to the
//! cache, inter-tick delay, streak bookkeeping. Consumers observe the result
//! through a `watch` channel of [`DisplayState`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CachedUpdate, WeatherCache};
use crate::clock::{Clock, SystemClock};
use crate::connectivity::ConnectivityProbe;
use crate::pipeline::{FetchError, FetchPipeline, FetchedUpdate};
use crate::staleness::{classify, classify_fallback, StalenessBasis, StatusMessage};
use crate::types::{PlaceInfo, WeatherSnapshot};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between the end of one tick and the start of the next
    pub tick_interval: Duration,
    /// How long the "in progress" indicator stays up before each attempt
    pub grace_period: Duration,
    /// Upper bound on a cache write
    pub cache_timeout: Duration,
    pub staleness_basis: StalenessBasis,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            staleness_basis: StalenessBasis::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Update cycle is unavailable; its task ended abnormally")]
    Unavailable,
}

/// State carried from tick to tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateState {
    pub last_weather: Option<WeatherSnapshot>,
    pub last_place: Option<PlaceInfo>,
    /// 0 = never
    pub last_success_epoch_ms: u64,
    pub offline_streak_ticks: u32,
    pub cycle_generation: u64,
}

impl UpdateState {
    fn restored(cached: CachedUpdate) -> Self {
        Self {
            last_weather: cached.weather,
            last_place: cached.place,
            last_success_epoch_ms: cached.last_success_epoch_ms,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPhase {
    #[default]
    Idle,
    /// A tick is under way; `DisplayState::in_progress` says whether the
    /// indicator is currently visible.
    InProgress,
    OnlineSuccess,
    OnlineFailure,
    OfflineFallback,
    OfflineNoData,
}

/// What the UI layer should show.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    pub phase: TickPhase,
    pub in_progress: bool,
    pub status: StatusMessage,
    pub weather: Option<WeatherSnapshot>,
    pub place: Option<PlaceInfo>,
    pub offline_streak_ticks: u32,
    pub last_success_epoch_ms: u64,
    pub cycle_generation: u64,
}

impl DisplayState {
    fn from_state(phase: TickPhase, status: StatusMessage, state: &UpdateState) -> Self {
        Self {
            phase,
            in_progress: false,
            status,
            weather: state.last_weather.clone(),
            place: state.last_place.clone(),
            offline_streak_ticks: state.offline_streak_ticks,
            last_success_epoch_ms: state.last_success_epoch_ms,
            cycle_generation: state.cycle_generation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Fresh,
    Fallback,
}

/// Resolves to false if `token` fires first.
async fn sleep_unless_cancelled(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn clear_indicator(display: &watch::Sender<DisplayState>) {
    display.send_modify(|d| {
        d.in_progress = false;
        if d.phase == TickPhase::InProgress {
            d.phase = TickPhase::Idle;
        }
    });
}

/// The tick machinery and the state it owns. Moved into the cycle task on
/// start and handed back on stop.
pub(crate) struct UpdateCycle {
    config: SchedulerConfig,
    pipeline: FetchPipeline,
    probe: Arc<dyn ConnectivityProbe>,
    cache: WeatherCache,
    clock: Arc<dyn Clock>,
    state: UpdateState,
    display: Arc<watch::Sender<DisplayState>>,
}

impl UpdateCycle {
    pub(crate) fn new(
        config: SchedulerConfig,
        pipeline: FetchPipeline,
        probe: Arc<dyn ConnectivityProbe>,
        cache: WeatherCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = UpdateState::restored(cache.load());
        let status = classify(
            state.last_success_epoch_ms,
            clock.now_epoch_ms(),
            state.offline_streak_ticks,
        );
        let (display, _) = watch::channel(DisplayState::from_state(TickPhase::Idle, status, &state));

        Self {
            config,
            pipeline,
            probe,
            cache,
            clock,
            state,
            display: Arc::new(display),
        }
    }

    pub(crate) fn state(&self) -> &UpdateState {
        &self.state
    }

    pub(crate) async fn run(mut self, shutdown: CancellationToken) -> Self {
        tracing::info!(
            "Weather update cycle started (interval {:?})",
            self.config.tick_interval
        );

        while !shutdown.is_cancelled() {
            let Some(outcome) = self.tick(&shutdown).await else {
                break;
            };
            // A completed tick is settled even when the delay is cut short
            let waited = sleep_unless_cancelled(self.config.tick_interval, &shutdown).await;
            self.settle(outcome);
            if !waited {
                break;
            }
        }

        clear_indicator(&self.display);
        tracing::info!("Weather update cycle stopped");
        self
    }

    /// Everything up to the inter-tick delay. Returns `None` if cancelled
    /// before anything was committed, in which case the state is untouched.
    pub(crate) async fn tick(&mut self, shutdown: &CancellationToken) -> Option<TickOutcome> {
        let tick_token = shutdown.child_token();
        let _release = tick_token.clone().drop_guard();

        self.set_indicator(true);
        let waited = sleep_unless_cancelled(self.config.grace_period, &tick_token).await;
        self.set_indicator(false);
        if !waited {
            return None;
        }

        let offline = tokio::select! {
            biased;
            _ = tick_token.cancelled() => return None,
            offline = self.probe.is_offline() => offline,
        };

        if offline {
            tracing::info!("Network unavailable, showing cached weather");
            return Some(self.fall_back(false));
        }

        match self.pipeline.fetch_once(&tick_token).await {
            Ok(update) => {
                self.commit(update).await;
                Some(TickOutcome::Fresh)
            }
            Err(FetchError::Canceled) => None,
            Err(e) => {
                tracing::warn!("Weather update failed: {}", e);
                Some(self.fall_back(true))
            }
        }
    }

    /// Streak bookkeeping, applied once the inter-tick delay has elapsed or
    /// been cancelled.
    pub(crate) fn settle(&mut self, outcome: TickOutcome) {
        self.state.offline_streak_ticks = match outcome {
            TickOutcome::Fresh => 0,
            TickOutcome::Fallback => self.state.offline_streak_ticks.saturating_add(1),
        };
        let streak = self.state.offline_streak_ticks;
        self.display.send_modify(|d| d.offline_streak_ticks = streak);
    }

    async fn commit(&mut self, update: FetchedUpdate) {
        let now = self.clock.now_epoch_ms();
        let FetchedUpdate {
            mut weather, place, ..
        } = update;
        weather.fetched_at_epoch_ms = now;

        self.state.last_weather = Some(weather.clone());
        if let Some(place) = &place {
            self.state.last_place = Some(place.clone());
        }
        self.state.last_success_epoch_ms = self.state.last_success_epoch_ms.max(now);
        self.state.offline_streak_ticks = 0;
        self.state.cycle_generation += 1;

        let status = classify(self.state.last_success_epoch_ms, now, 0);
        self.publish(TickPhase::OnlineSuccess, status);

        tracing::info!(
            "Weather updated: {:.1}° {} at {}",
            weather.temperature,
            weather.description,
            self.state
                .last_place
                .as_ref()
                .map(PlaceInfo::display_name)
                .unwrap_or_else(|| "unknown place".to_string())
        );

        let cached = CachedUpdate {
            weather: Some(weather),
            place,
            last_success_epoch_ms: self.state.last_success_epoch_ms,
        };
        if let Err(e) = self
            .cache
            .store_bounded(cached, self.config.cache_timeout)
            .await
        {
            tracing::warn!("Failed to persist weather update: {}", e);
        }
    }

    fn fall_back(&mut self, online: bool) -> TickOutcome {
        let has_cache = self.state.last_weather.is_some();
        let status = if has_cache {
            classify_fallback(
                self.config.staleness_basis,
                self.state.last_success_epoch_ms,
                self.clock.now_epoch_ms(),
                self.state.offline_streak_ticks,
            )
        } else {
            StatusMessage::UpdateFailedNoData
        };
        let phase = match (online, has_cache) {
            (true, _) => TickPhase::OnlineFailure,
            (false, true) => TickPhase::OfflineFallback,
            (false, false) => TickPhase::OfflineNoData,
        };

        self.state.cycle_generation += 1;
        self.publish(phase, status);
        TickOutcome::Fallback
    }

    fn publish(&self, phase: TickPhase, status: StatusMessage) {
        self.display
            .send_replace(DisplayState::from_state(phase, status, &self.state));
    }

    fn set_indicator(&self, visible: bool) {
        self.display.send_modify(|d| {
            d.in_progress = visible;
            if visible {
                d.phase = TickPhase::InProgress;
            }
        });
    }
}

struct RunningCycle {
    shutdown: CancellationToken,
    handle: JoinHandle<UpdateCycle>,
}

/// Owns the update cycle and its task.
pub struct UpdateScheduler {
    cycle: Option<UpdateCycle>,
    running: Option<RunningCycle>,
    display: Arc<watch::Sender<DisplayState>>,
}

impl UpdateScheduler {
    /// Build a scheduler. The persisted snapshot, if any, is restored
    /// immediately and published as the initial display state.
    pub fn new(
        config: SchedulerConfig,
        pipeline: FetchPipeline,
        probe: Arc<dyn ConnectivityProbe>,
        cache: WeatherCache,
    ) -> Self {
        Self::with_clock(config, pipeline, probe, cache, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SchedulerConfig,
        pipeline: FetchPipeline,
        probe: Arc<dyn ConnectivityProbe>,
        cache: WeatherCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cycle = UpdateCycle::new(config, pipeline, probe, cache, clock);
        let display = cycle.display.clone();
        Self {
            cycle: Some(cycle),
            running: None,
            display,
        }
    }

    /// Start the repeating cycle on the current tokio runtime. Starting an
    /// already running scheduler does nothing.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.running.is_some() {
            tracing::debug!("Weather scheduler already running");
            return Ok(());
        }

        let cycle = self.cycle.take().ok_or(SchedulerError::Unavailable)?;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(cycle.run(shutdown.clone()));
        self.running = Some(RunningCycle { shutdown, handle });
        Ok(())
    }

    /// Cancel the cycle and any in-flight fetch, then wait for the task to
    /// finish. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.shutdown.cancel();
        match running.handle.await {
            Ok(cycle) => self.cycle = Some(cycle),
            Err(e) => tracing::error!("Weather update task failed: {}", e),
        }

        clear_indicator(&self.display);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.display.subscribe()
    }

    pub fn display(&self) -> DisplayState {
        self.display.borrow().clone()
    }

    /// The owned state, available while the scheduler is stopped.
    pub fn state(&self) -> Option<&UpdateState> {
        self.cycle.as_ref().map(UpdateCycle::state)
    }
}

impl Drop for UpdateScheduler {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}

impl std::fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("running", &self.is_running())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::cache::{CacheError, KeyValueStore, MemoryStore};
    use crate::connectivity::ManualConnectivity;
    use crate::pipeline::test_support::*;

    const T0: u64 = 1_700_000_000_000;

    struct TestClock(AtomicU64);

    impl TestClock {
        fn at(ms: u64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(ms)))
        }

        fn advance(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for TestClock {
        fn now_epoch_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        cycle: UpdateCycle,
        location: Arc<ScriptedLocation>,
        weather: Arc<ScriptedWeather>,
        places: Arc<ScriptedPlaces>,
        probe: ManualConnectivity,
        cache: WeatherCache,
        clock: Arc<TestClock>,
    }

    fn harness_with(cache: WeatherCache, config: SchedulerConfig) -> Harness {
        let location = Arc::new(ScriptedLocation::at_fort_worth());
        let weather = Arc::new(ScriptedWeather::ok(72.0));
        let places = Arc::new(ScriptedPlaces::ok(fort_worth()));
        let probe = ManualConnectivity::new(false);
        let clock = TestClock::at(T0);
        let pipeline = FetchPipeline::new(location.clone(), weather.clone(), places.clone());
        let cycle = UpdateCycle::new(
            config,
            pipeline,
            Arc::new(probe.clone()),
            cache.clone(),
            clock.clone(),
        );
        Harness {
            cycle,
            location,
            weather,
            places,
            probe,
            cache,
            clock,
        }
    }

    /// Reads nothing and rejects every write.
    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Ok(None)
        }

        fn put(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
            Err(CacheError::Task("read-only store".into()))
        }
    }

    fn harness() -> Harness {
        harness_with(
            WeatherCache::new(Arc::new(MemoryStore::new())),
            SchedulerConfig::default(),
        )
    }

    fn seeded_cache(temperature: f64) -> WeatherCache {
        let cache = WeatherCache::new(Arc::new(MemoryStore::new()));
        cache
            .store(&CachedUpdate {
                weather: Some(snapshot(temperature)),
                place: Some(fort_worth()),
                last_success_epoch_ms: T0 - 600_000,
            })
            .unwrap();
        cache
    }

    /// Tick plus settle, as the run loop does it.
    async fn full_tick(h: &mut Harness) -> TickOutcome {
        let outcome = h.cycle.tick(&CancellationToken::new()).await.unwrap();
        h.cycle.settle(outcome);
        outcome
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_success_updates_state() {
        let mut h = harness();
        h.clock.advance(5_000);

        let outcome = h.cycle.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, TickOutcome::Fresh);

        let display = h.cycle.display.borrow().clone();
        assert_eq!(display.phase, TickPhase::OnlineSuccess);
        assert_eq!(display.status, StatusMessage::UpdatedJustNow);
        assert!(!display.in_progress);
        assert_eq!(display.weather.as_ref().unwrap().temperature, 72.0);
        assert_eq!(display.place.as_ref().unwrap().display_name(), "Fort Worth, TX");
        assert_eq!(
            display.weather.as_ref().unwrap().fetched_at_epoch_ms,
            T0 + 5_000
        );

        let state = h.cycle.state();
        assert_eq!(state.offline_streak_ticks, 0);
        assert_eq!(state.last_success_epoch_ms, T0 + 5_000);
        assert_eq!(state.cycle_generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_writes_through_cache() {
        let mut h = harness();
        full_tick(&mut h).await;

        let cached = h.cache.load();
        assert_eq!(cached.weather.unwrap().temperature, 72.0);
        assert_eq!(cached.place, Some(fort_worth()));
        assert_eq!(cached.last_success_epoch_ms, T0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_streak_counts_and_resets() {
        let mut h = harness();
        h.probe.set_offline(true);

        for n in 1..=5 {
            assert_eq!(full_tick(&mut h).await, TickOutcome::Fallback);
            assert_eq!(h.cycle.state().offline_streak_ticks, n);
        }

        h.probe.set_offline(false);
        assert_eq!(full_tick(&mut h).await, TickOutcome::Fresh);
        assert_eq!(h.cycle.state().offline_streak_ticks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_with_cache_uses_pre_increment_streak() {
        let mut h = harness_with(seeded_cache(68.0), SchedulerConfig::default());
        h.probe.set_offline(true);
        for _ in 0..3 {
            full_tick(&mut h).await;
        }
        assert_eq!(h.cycle.state().offline_streak_ticks, 3);

        let outcome = h.cycle.tick(&CancellationToken::new()).await.unwrap();
        let display = h.cycle.display.borrow().clone();
        assert_eq!(display.phase, TickPhase::OfflineFallback);
        assert_eq!(display.status, StatusMessage::UpdatedMinutesAgo(3));
        assert_eq!(display.weather.as_ref().unwrap().temperature, 68.0);
        assert_eq!(display.place, Some(fort_worth()));

        h.cycle.settle(outcome);
        assert_eq!(h.cycle.state().offline_streak_ticks, 4);
        // Fallback never touches the success timestamp
        assert_eq!(h.cycle.state().last_success_epoch_ms, T0 - 600_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_without_cache_reports_no_data() {
        let mut h = harness();
        h.probe.set_offline(true);

        full_tick(&mut h).await;
        let display = h.cycle.display.borrow().clone();
        assert_eq!(display.phase, TickPhase::OfflineNoData);
        assert_eq!(display.status, StatusMessage::UpdateFailedNoData);
        assert!(display.weather.is_none());
        assert_eq!(h.cycle.state().offline_streak_ticks, 1);
        assert_eq!(h.location.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_failure_falls_back_like_offline() {
        let mut h = harness_with(seeded_cache(55.0), SchedulerConfig::default());
        h.weather.set(Err(503));

        assert_eq!(full_tick(&mut h).await, TickOutcome::Fallback);
        let display = h.cycle.display.borrow().clone();
        assert_eq!(display.phase, TickPhase::OnlineFailure);
        assert_eq!(display.status, StatusMessage::UpdatedJustNow);
        assert_eq!(display.weather.as_ref().unwrap().temperature, 55.0);
        assert_eq!(h.cycle.state().offline_streak_ticks, 1);

        full_tick(&mut h).await;
        assert_eq!(
            h.cycle.display.borrow().status,
            StatusMessage::UpdatedOneMinuteAgo
        );
        assert_eq!(h.cycle.state().offline_streak_ticks, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_failure_keeps_previous_place() {
        let mut h = harness_with(seeded_cache(58.0), SchedulerConfig::default());
        h.probe.set_offline(true);
        full_tick(&mut h).await;
        assert_eq!(h.cycle.state().offline_streak_ticks, 1);

        h.probe.set_offline(false);
        h.places.set(None);
        assert_eq!(full_tick(&mut h).await, TickOutcome::Fresh);

        let state = h.cycle.state();
        assert_eq!(state.offline_streak_ticks, 0);
        assert_eq!(state.last_weather.as_ref().unwrap().temperature, 72.0);
        assert_eq!(state.last_place, Some(fort_worth()));

        let display = h.cycle.display.borrow().clone();
        assert_eq!(display.phase, TickPhase::OnlineSuccess);
        assert_eq!(display.place, Some(fort_worth()));

        let cached = h.cache.load();
        assert_eq!(cached.weather.unwrap().temperature, 72.0);
        assert_eq!(cached.place, Some(fort_worth()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_write_failure_does_not_stop_updates() {
        let h = harness_with(
            WeatherCache::new(Arc::new(ReadOnlyStore)),
            SchedulerConfig::default(),
        );
        let Harness { mut cycle, .. } = h;

        assert_eq!(
            cycle.tick(&CancellationToken::new()).await,
            Some(TickOutcome::Fresh)
        );
        assert_eq!(cycle.state().last_weather.as_ref().unwrap().temperature, 72.0);
        assert_eq!(cycle.state().last_success_epoch_ms, T0);
        assert_eq!(cycle.display.borrow().phase, TickPhase::OnlineSuccess);

        // The loop keeps ticking after further failed writes
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(cycle.run(shutdown.clone()));
        tokio::time::sleep(
            DEFAULT_GRACE_PERIOD * 2 + DEFAULT_TICK_INTERVAL + Duration::from_secs(1),
        )
        .await;
        shutdown.cancel();
        let cycle = task.await.unwrap();
        assert_eq!(cycle.state().cycle_generation, 3);
        assert_eq!(cycle.state().offline_streak_ticks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_delay_still_counts_the_tick() {
        let h = harness_with(seeded_cache(66.0), SchedulerConfig::default());
        h.probe.set_offline(true);
        let Harness { cycle, .. } = h;

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(cycle.run(shutdown.clone()));
        tokio::time::sleep(DEFAULT_GRACE_PERIOD + Duration::from_secs(5)).await;
        shutdown.cancel();

        let mut cycle = task.await.unwrap();
        assert_eq!(cycle.state().cycle_generation, 1);
        assert_eq!(cycle.state().offline_streak_ticks, 1);
        assert_eq!(cycle.display.borrow().offline_streak_ticks, 1);

        // Resuming continues the streak where it left off
        let outcome = cycle.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            cycle.display.borrow().status,
            StatusMessage::UpdatedOneMinuteAgo
        );
        cycle.settle(outcome);
        assert_eq!(cycle.state().offline_streak_ticks, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_location_is_a_failed_tick() {
        let mut h = harness();
        h.location.set(LocationScript::Nowhere);

        assert_eq!(full_tick(&mut h).await, TickOutcome::Fallback);
        let display = h.cycle.display.borrow().clone();
        assert_eq!(display.phase, TickPhase::OnlineFailure);
        assert_eq!(display.status, StatusMessage::UpdateFailedNoData);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_basis_uses_elapsed_time() {
        let config = SchedulerConfig {
            staleness_basis: StalenessBasis::WallClock,
            ..SchedulerConfig::default()
        };
        let mut h = harness_with(seeded_cache(60.0), config);
        h.probe.set_offline(true);

        full_tick(&mut h).await;
        assert_eq!(
            h.cycle.display.borrow().status,
            StatusMessage::UpdatedMinutesAgo(10)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_flight_leaves_state_unchanged() {
        let mut h = harness_with(seeded_cache(64.0), SchedulerConfig::default());
        let before = h.cycle.state().clone();
        h.location.set(LocationScript::CancelAndHang);

        let result = h.cycle.tick(&CancellationToken::new()).await;
        assert!(result.is_none());
        assert_eq!(h.cycle.state(), &before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_grace_period_skips_probe() {
        let mut h = harness();
        let before = h.cycle.state().clone();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert!(h.cycle.tick(&shutdown).await.is_none());
        assert_eq!(h.cycle.state(), &before);
        assert_eq!(h.location.calls.load(Ordering::SeqCst), 0);
        assert!(!h.cycle.display.borrow().in_progress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_state_is_published_initially() {
        let h = harness_with(seeded_cache(70.0), SchedulerConfig::default());
        let display = h.cycle.display.borrow().clone();
        assert_eq!(display.phase, TickPhase::Idle);
        assert_eq!(display.status, StatusMessage::UpdatedMinutesAgo(10));
        assert_eq!(display.weather.unwrap().temperature, 70.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_success_is_monotonic() {
        let mut h = harness();
        full_tick(&mut h).await;
        assert_eq!(h.cycle.state().last_success_epoch_ms, T0);

        // Clock stepped backwards
        h.clock.0.store(T0 - 120_000, Ordering::SeqCst);
        full_tick(&mut h).await;
        assert_eq!(h.cycle.state().last_success_epoch_ms, T0);
        assert_eq!(h.cycle.state().cycle_generation, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_start_stop_is_idempotent() {
        let pipeline = FetchPipeline::new(
            Arc::new(ScriptedLocation::at_fort_worth()),
            Arc::new(ScriptedWeather::ok(72.0)),
            Arc::new(ScriptedPlaces::ok(fort_worth())),
        );
        let mut scheduler = UpdateScheduler::with_clock(
            SchedulerConfig::default(),
            pipeline,
            Arc::new(ManualConnectivity::new(false)),
            WeatherCache::new(Arc::new(MemoryStore::new())),
            TestClock::at(T0),
        );
        let mut rx = scheduler.subscribe();

        scheduler.stop().await;
        scheduler.start().unwrap();
        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(scheduler.state().is_none());

        loop {
            rx.changed().await.unwrap();
            if rx.borrow().phase == TickPhase::OnlineSuccess {
                break;
            }
        }

        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());
        assert!(!scheduler.display().in_progress);
        let state = scheduler.state().unwrap();
        assert_eq!(state.last_weather.as_ref().unwrap().temperature, 72.0);
        assert_eq!(state.cycle_generation, 1);

        // Restart resumes from the retained state
        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        scheduler.stop().await;
        assert!(scheduler.state().unwrap().cycle_generation >= 1);
    }
}
