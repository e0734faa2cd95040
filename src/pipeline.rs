//! The threaded capture → window → FFT → convert → publish pipeline.
//!
//! One dedicated thread drains the ingestion channel into the
//! [`SampleAccumulator`]; each completed window becomes a fire-and-forget
//! transform on the rayon pool; a second thread converts finished
//! transforms and publishes them. Transforms may finish out of dispatch
//! order; the publisher discards anything captured before the frame it
//! already holds.

pub mod cancel;
pub mod channel;
pub mod publisher;
pub mod supervisor;

use crate::config::AnalyzerConfig;
use crate::dsp::accumulator::SampleAccumulator;
use crate::dsp::fft::FftEngine;
use crate::dsp::pool::{BufferPool, PooledBuffer};
use crate::dsp::scale::FrequencyScale;
use crate::dsp::spectrum::{GainProvider, SpectrumConverter};
use crate::dsp::trig::TrigTableCache;
use crate::dsp::window::{WindowBank, WindowCache, WindowKind};
use crate::error::{AnalyzerError, Result};
use async_channel::Receiver as AsyncReceiver;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub use cancel::CancelToken;
pub use channel::{DropOldestChannel, SendOutcome};
pub use publisher::{Dispatcher, SpectralData, SpectralPublisher, SubscriptionId};
pub use supervisor::TaskTracker;

/// What happened to a chunk handed to [`SpectrumAnalyzer::add_samples`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// Queued after the oldest pending chunk was evicted.
    QueuedEvictedOldest,
    /// Not queued: the chunk was empty, the caller had cancelled, or it could not be buffered.
    Ignored,
    /// Not queued because the sample rate is invalid or the analyzer is shut down.
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidSampleRate,
    Disposed,
}

/// Counters describing pipeline health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub dropped_chunks: u64,
    pub dropped_results: u64,
    pub transforms_in_flight: usize,
}

struct SampleChunk {
    samples: Vec<f32>,
    sample_rate: f32,
    token: CancelToken,
}

struct FftResult {
    buffer: PooledBuffer,
    sample_rate: f32,
    captured_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    window: WindowKind,
    scale: FrequencyScale,
}

struct Shared {
    config: AnalyzerConfig,
    cancel: CancelToken,
    disposed: AtomicBool,
    settings: RwLock<Settings>,
    accumulator: Mutex<SampleAccumulator>,
    engine: FftEngine,
    converter: SpectrumConverter,
    pool: Arc<BufferPool>,
    ingest: DropOldestChannel<SampleChunk>,
    results: DropOldestChannel<FftResult>,
    publisher: SpectralPublisher,
    tasks: TaskTracker,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Real-time spectrum analyzer fed from a capture callback.
pub struct SpectrumAnalyzer {
    shared: Arc<Shared>,
}

impl SpectrumAnalyzer {
    /// Builds the pipeline with the process-wide trigonometric table cache.
    pub fn new(config: AnalyzerConfig, gain: Arc<dyn GainProvider>) -> Result<Self> {
        Self::with_trig_cache(config, gain, TrigTableCache::shared())
    }

    pub fn with_trig_cache(
        config: AnalyzerConfig,
        gain: Arc<dyn GainProvider>,
        trig: Arc<TrigTableCache>,
    ) -> Result<Self> {
        let config = config.normalized();
        config.validate()?;

        let engine = FftEngine::new(config.fft_size)?;
        let windows = WindowCache::new(trig);
        let bank = WindowBank::new(&windows, config.fft_size);
        let pool = BufferPool::new();
        let accumulator = SampleAccumulator::with_parallel_threshold(
            bank,
            config.window,
            Arc::clone(&pool),
            config.parallel_window_threshold,
        );

        let shared = Arc::new(Shared {
            config,
            cancel: CancelToken::new(),
            disposed: AtomicBool::new(false),
            settings: RwLock::new(Settings {
                window: config.window,
                scale: config.scale,
            }),
            accumulator: Mutex::new(accumulator),
            engine,
            converter: SpectrumConverter::with_parallel_threshold(
                gain,
                config.parallel_bin_threshold,
            ),
            pool,
            ingest: DropOldestChannel::new(config.channel_capacity)?,
            results: DropOldestChannel::new(config.channel_capacity)?,
            publisher: SpectralPublisher::new(),
            tasks: TaskTracker::new(),
            workers: Mutex::new(Vec::new()),
        });

        let ingest = spawn_worker("spectrum-tap-ingest", &shared, Shared::ingest_loop);
        let convert = spawn_worker("spectrum-tap-convert", &shared, Shared::convert_loop);
        match (ingest, convert) {
            (Ok(ingest), Ok(convert)) => shared.workers.lock().extend([ingest, convert]),
            (ingest, convert) => {
                let err = ingest.as_ref().err().or(convert.as_ref().err());
                error!("[analyzer] failed to spawn pipeline threads: {err:?}");
                shared.workers.lock().extend(ingest.into_iter().chain(convert));
                shared.shutdown();
                return Err(AnalyzerError::Disposed);
            }
        }

        info!(
            "[analyzer] started: fft_size={}, window={}, scale={}, capacity={}",
            config.fft_size, config.window, config.scale, config.channel_capacity
        );
        Ok(Self { shared })
    }

    pub fn config(&self) -> AnalyzerConfig {
        self.shared.config
    }

    /// Admits a mono chunk without blocking. Never panics.
    pub fn add_samples(
        &self,
        samples: &[f32],
        sample_rate: f32,
        token: &CancelToken,
    ) -> Admission {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return Admission::Rejected(RejectReason::Disposed);
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            debug!("[analyzer] rejecting chunk with sample rate {sample_rate}");
            return Admission::Rejected(RejectReason::InvalidSampleRate);
        }
        if samples.is_empty() || token.is_cancelled() {
            return Admission::Ignored;
        }

        let mut owned = Vec::new();
        if owned.try_reserve_exact(samples.len()).is_err() {
            warn!("[analyzer] could not buffer {} samples", samples.len());
            return Admission::Ignored;
        }
        owned.extend_from_slice(samples);

        let chunk = SampleChunk {
            samples: owned,
            sample_rate,
            token: token.linked(&shared.cancel),
        };
        match shared.ingest.send(chunk) {
            SendOutcome::Queued => Admission::Queued,
            SendOutcome::EvictedOldest => Admission::QueuedEvictedOldest,
            SendOutcome::Closed => Admission::Rejected(RejectReason::Disposed),
        }
    }

    pub fn window_type(&self) -> WindowKind {
        self.shared.settings.read().window
    }

    pub fn scale_type(&self) -> FrequencyScale {
        self.shared.settings.read().scale
    }

    /// Returns `true` if the window changed (and the spectrum was reset).
    pub fn set_window_type(&self, window: WindowKind) -> bool {
        let scale = self.scale_type();
        self.update_settings(window, scale)
    }

    /// Returns `true` if the scale changed (and the spectrum was reset).
    pub fn set_scale_type(&self, scale: FrequencyScale) -> bool {
        let window = self.window_type();
        self.update_settings(window, scale)
    }

    /// Applies both settings at once; a no-op when neither differs.
    pub fn update_settings(&self, window: WindowKind, scale: FrequencyScale) -> bool {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return false;
        }

        let reset_at = {
            let mut settings = shared.settings.write();
            if settings.window == window && settings.scale == scale {
                return false;
            }
            settings.window = window;
            settings.scale = scale;

            let mut accumulator = shared.accumulator.lock();
            accumulator.set_window(window);
            accumulator.reset_state();
            Instant::now()
        };

        info!("[analyzer] settings changed: window={window}, scale={scale}");
        shared.publisher.reset_at(scale, reset_at);
        true
    }

    /// Discards partially accumulated samples and publishes an empty frame.
    pub fn reset(&self) {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return;
        }
        let scale = self.scale_type();
        let reset_at = {
            shared.accumulator.lock().reset_state();
            Instant::now()
        };
        shared.publisher.reset_at(scale, reset_at);
    }

    /// Latest published frame. Never waits on pipeline activity.
    pub fn current_spectrum(&self) -> Option<Arc<SpectralData>> {
        self.shared.publisher.current()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Arc<SpectralData>) + Send + Sync + 'static,
    {
        self.shared.publisher.subscribe(callback)
    }

    pub fn subscribe_dispatched<F>(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(Arc<SpectralData>) + Send + Sync + 'static,
    {
        self.shared.publisher.subscribe_dispatched(dispatcher, callback)
    }

    pub fn stream(&self, capacity: usize) -> AsyncReceiver<Arc<SpectralData>> {
        self.shared.publisher.stream(capacity)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.publisher.unsubscribe(id)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            dropped_chunks: self.shared.ingest.dropped(),
            dropped_results: self.shared.results.dropped(),
            transforms_in_flight: self.shared.tasks.in_flight(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Stops the pipeline and waits (bounded) for in-flight transforms.
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// [`shutdown`](Self::shutdown) without blocking the calling task; the
    /// drain runs on a helper thread and the future resolves when it is done.
    pub fn shutdown_async(&self) -> impl Future<Output = ()> + Send + 'static {
        let (done_tx, done_rx) = async_channel::bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("spectrum-tap-shutdown".into())
            .spawn(move || {
                shared.shutdown();
                let _ = done_tx.send_blocking(());
            });
        if let Err(err) = spawned {
            warn!("[analyzer] shutdown helper unavailable ({err}); shutting down inline");
            self.shared.shutdown();
        }
        async move {
            let _ = done_rx.recv().await;
        }
    }
}

impl Drop for SpectrumAnalyzer {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn spawn_worker(
    name: &str,
    shared: &Arc<Shared>,
    body: fn(&Arc<Shared>),
) -> std::io::Result<JoinHandle<()>> {
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(name.into())
        .spawn(move || body(&shared))
}

impl Shared {
    fn ingest_loop(self: &Arc<Self>) {
        while let Some(chunk) = self.ingest.recv(&self.cancel) {
            if chunk.token.is_cancelled() {
                debug!("[accumulator] skipping cancelled chunk");
                continue;
            }
            if chunk.samples.is_empty() {
                warn!("[accumulator] received empty chunk");
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut accumulator = self.accumulator.lock();
                accumulator.push_samples(&chunk.samples, |window| {
                    self.dispatch_transform(window, chunk.sample_rate, Instant::now());
                })
            }));
            if outcome.is_err() {
                error!("[accumulator] chunk of {} samples aborted", chunk.samples.len());
                self.accumulator.lock().reset_state();
            }
        }
        debug!("[accumulator] ingestion loop stopped");
    }

    fn dispatch_transform(
        self: &Arc<Self>,
        mut buffer: PooledBuffer,
        sample_rate: f32,
        captured_at: Instant,
    ) {
        if self.cancel.is_cancelled() {
            return;
        }

        let guard = self.tasks.track();
        let shared = Arc::clone(self);
        rayon::spawn(move || {
            let _guard = guard;
            let transformed = panic::catch_unwind(AssertUnwindSafe(|| {
                shared.engine.transform(&mut buffer)
            }));
            match transformed {
                Ok(Ok(())) if !shared.cancel.is_cancelled() => {
                    shared.results.send(FftResult {
                        buffer,
                        sample_rate,
                        captured_at,
                    });
                }
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("[fft] transform failed: {err}"),
                Err(_) => error!("[fft] transform panicked"),
            }
        });
    }

    fn convert_loop(self: &Arc<Self>) {
        while let Some(result) = self.results.recv(&self.cancel) {
            let scale = self.settings.read().scale;
            let magnitudes = panic::catch_unwind(AssertUnwindSafe(|| {
                self.converter
                    .convert_or_empty(&result.buffer, result.sample_rate, scale)
            }))
            .unwrap_or_else(|_| {
                error!("[converter] conversion panicked; frame dropped");
                Vec::new()
            });
            let FftResult { buffer, captured_at, .. } = result;
            drop(buffer);

            if magnitudes.is_empty() || self.cancel.is_cancelled() {
                continue;
            }
            self.publisher.publish(magnitudes, captured_at, scale);
        }
        debug!("[converter] conversion loop stopped");
    }

    fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("[analyzer] shutting down");

        self.cancel.cancel();
        self.publisher.close();
        self.ingest.close();
        self.results.close();

        let timeout = self.config.shutdown_timeout();
        if !self.tasks.wait_idle(timeout) {
            warn!(
                "[analyzer] {} transforms still running after {:?}; continuing shutdown",
                self.tasks.in_flight(),
                timeout
            );
        }

        let current = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            let name = worker.thread().name().unwrap_or("worker").to_owned();
            if worker.join().is_err() {
                error!("[analyzer] {name} thread panicked");
            }
        }

        drop(self.ingest.drain());
        drop(self.results.drain());
        self.pool.close();
        info!("[analyzer] shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GainConfig, GainSettings};
    use std::time::Duration;

    const SAMPLE_RATE: f32 = 48_000.0;

    fn config(fft_size: usize) -> AnalyzerConfig {
        AnalyzerConfig {
            fft_size,
            window: WindowKind::Hann,
            scale: FrequencyScale::Linear,
            gain: GainConfig {
                min_db: -40.0,
                max_db: 60.0,
                amplification: 1.0,
            },
            ..AnalyzerConfig::default()
        }
    }

    fn analyzer(fft_size: usize) -> SpectrumAnalyzer {
        let config = config(fft_size);
        SpectrumAnalyzer::with_trig_cache(
            config,
            Arc::new(GainSettings::new(config.gain)),
            Arc::new(TrigTableCache::new()),
        )
        .unwrap()
    }

    fn tone(bin: usize, size: usize) -> Vec<f32> {
        (0..size)
            .map(|n| {
                let cycle = ((bin * n) % size) as f32 / size as f32;
                (core::f32::consts::TAU * cycle).sin()
            })
            .collect()
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn rejects_invalid_configuration() {
        let gain: Arc<dyn GainProvider> = Arc::new(GainSettings::default());
        let err = SpectrumAnalyzer::new(
            AnalyzerConfig {
                fft_size: 1000,
                ..AnalyzerConfig::default()
            },
            gain,
        )
        .unwrap_err();
        assert_eq!(err, AnalyzerError::InvalidTransformSize(1000));
    }

    #[test]
    fn pure_tone_is_published_at_its_bin() {
        let size = 1024;
        let analyzer = analyzer(size);
        let stream = analyzer.stream(4);

        let token = CancelToken::new();
        let samples = tone(64, size);
        for chunk in samples.chunks(256) {
            assert_eq!(analyzer.add_samples(chunk, SAMPLE_RATE, &token), Admission::Queued);
        }

        let frame = pollster::block_on(stream.recv()).unwrap();
        assert_eq!(frame.magnitudes().len(), size / 2 + 1);
        assert_eq!(frame.scale(), FrequencyScale::Linear);
        let peak = frame
            .magnitudes()
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx)
            .unwrap();
        assert!(peak.abs_diff(64) <= 1, "peak at {peak}");
        assert!(frame.magnitudes().iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(
            analyzer.current_spectrum().unwrap().sequence(),
            frame.sequence()
        );
    }

    #[test]
    fn invalid_input_never_reaches_the_pipeline() {
        let analyzer = analyzer(64);
        let token = CancelToken::new();
        assert_eq!(
            analyzer.add_samples(&[0.1; 8], 0.0, &token),
            Admission::Rejected(RejectReason::InvalidSampleRate)
        );
        assert_eq!(
            analyzer.add_samples(&[0.1; 8], f32::NAN, &token),
            Admission::Rejected(RejectReason::InvalidSampleRate)
        );
        assert_eq!(analyzer.add_samples(&[], SAMPLE_RATE, &token), Admission::Ignored);

        token.cancel();
        assert_eq!(
            analyzer.add_samples(&[0.1; 8], SAMPLE_RATE, &token),
            Admission::Ignored
        );
    }

    #[test]
    fn settings_change_publishes_empty_frame_first() {
        let size = 256;
        let analyzer = analyzer(size);
        let stream = analyzer.stream(8);
        let token = CancelToken::new();

        analyzer.add_samples(&tone(16, size), SAMPLE_RATE, &token);
        let first = pollster::block_on(stream.recv()).unwrap();
        assert!(!first.is_empty());

        assert!(!analyzer.update_settings(WindowKind::Hann, FrequencyScale::Linear));
        assert!(analyzer.update_settings(WindowKind::Blackman, FrequencyScale::Mel));
        assert_eq!(analyzer.window_type(), WindowKind::Blackman);

        let reset = pollster::block_on(stream.recv()).unwrap();
        assert!(reset.is_empty());
        assert_eq!(reset.scale(), FrequencyScale::Mel);

        analyzer.add_samples(&tone(16, size), SAMPLE_RATE, &token);
        let next = pollster::block_on(stream.recv()).unwrap();
        assert_eq!(next.scale(), FrequencyScale::Mel);
        assert_eq!(next.magnitudes().len(), size / 2 + 1);
    }

    #[test]
    fn individual_setters_are_idempotent() {
        let analyzer = analyzer(64);
        assert!(!analyzer.set_window_type(WindowKind::Hann));
        assert!(!analyzer.set_scale_type(FrequencyScale::Linear));
        assert!(analyzer.current_spectrum().is_none());

        assert!(analyzer.set_scale_type(FrequencyScale::Erb));
        assert!(analyzer.current_spectrum().unwrap().is_empty());
        assert!(analyzer.set_window_type(WindowKind::Kaiser));
        assert_eq!(analyzer.current_spectrum().unwrap().sequence(), 2);
    }

    #[test]
    fn shutdown_is_graceful_and_idempotent() {
        let size = 128;
        let analyzer = analyzer(size);
        let token = CancelToken::new();
        analyzer.add_samples(&tone(8, size), SAMPLE_RATE, &token);
        assert!(wait_for(|| analyzer.current_spectrum().is_some()));
        let last = analyzer.current_spectrum().unwrap().sequence();

        analyzer.shutdown();
        assert!(analyzer.is_shut_down());
        assert_eq!(
            analyzer.add_samples(&tone(8, size), SAMPLE_RATE, &token),
            Admission::Rejected(RejectReason::Disposed)
        );
        assert!(!analyzer.set_scale_type(FrequencyScale::Bark));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(analyzer.current_spectrum().unwrap().sequence(), last);
        assert_eq!(analyzer.stats().transforms_in_flight, 0);

        analyzer.shutdown();
        assert!(analyzer.stream(1).is_closed());
    }

    #[test]
    fn async_shutdown_completes() {
        let analyzer = analyzer(64);
        pollster::block_on(analyzer.shutdown_async());
        assert!(analyzer.is_shut_down());
        pollster::block_on(analyzer.shutdown_async());
    }

    #[test]
    fn live_gain_changes_apply_to_the_next_frame() {
        let size = 256;
        let config = config(size);
        let gain = Arc::new(GainSettings::new(config.gain));
        let analyzer = SpectrumAnalyzer::with_trig_cache(
            config,
            gain.clone(),
            Arc::new(TrigTableCache::new()),
        )
        .unwrap();
        let stream = analyzer.stream(4);
        let token = CancelToken::new();

        analyzer.add_samples(&tone(20, size), SAMPLE_RATE, &token);
        let loud = pollster::block_on(stream.recv()).unwrap();
        assert!(loud.magnitudes()[20] > 0.0);

        gain.set_min_db(200.0);
        gain.set_max_db(300.0);
        analyzer.add_samples(&tone(20, size), SAMPLE_RATE, &token);
        let muted = pollster::block_on(stream.recv()).unwrap();
        assert!(muted.magnitudes().iter().all(|&v| v == 0.0));
    }
}
