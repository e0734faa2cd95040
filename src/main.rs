use anyhow::{Context, Result};
use spectrum_tap::audio::DEFAULT_SAMPLE_RATE;
use spectrum_tap::dsp::spectrum::source_bins;
use spectrum_tap::util::telemetry;
use spectrum_tap::{
    AnalyzerConfig, CaptureAdapter, FrequencyScale, GainSettings, SampleFormat, SpectrumAnalyzer,
};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const CHANNELS: usize = 2;
const PERIOD_FRAMES: usize = 480;
const TONES_HZ: [f32; 2] = [440.0, 3_000.0];
const RUN_TIME: Duration = Duration::from_secs(3);

fn main() -> Result<()> {
    telemetry::init();

    let config = match std::env::args().nth(1) {
        Some(path) => AnalyzerConfig::load(&path)?,
        None => AnalyzerConfig::default(),
    };
    info!("spectrum-tap starting: {config:?}");

    let gain = Arc::new(GainSettings::new(config.gain));
    let analyzer = Arc::new(
        SpectrumAnalyzer::new(config, gain.clone()).context("building spectrum analyzer")?,
    );

    let frames = Arc::new(AtomicU64::new(0));
    let subscription = {
        let frames = Arc::clone(&frames);
        analyzer.subscribe(move |data| {
            if data.is_empty() {
                info!("[demo] reset to {} scale", data.scale());
                return;
            }
            let count = frames.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 20 != 0 {
                return;
            }
            let bins = data.magnitudes().len();
            let lookup = source_bins(bins, DEFAULT_SAMPLE_RATE, data.scale());
            if let Some((peak, level)) = data
                .magnitudes()
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
            {
                let bin = lookup.get(peak).copied().unwrap_or(peak);
                let hz = bin as f32 * DEFAULT_SAMPLE_RATE / (2 * (bins - 1)) as f32;
                info!(
                    "[demo] frame #{} ({}): peak at index {peak} ~{hz:.0} Hz, level {level:.2}",
                    data.sequence(),
                    data.scale()
                );
            }
        })
    };

    let mut adapter = CaptureAdapter::new(Arc::clone(&analyzer));
    let period = Duration::from_secs_f32(PERIOD_FRAMES as f32 / DEFAULT_SAMPLE_RATE);
    let started = Instant::now();
    let mut frame_index = 0usize;
    let mut bytes = Vec::with_capacity(PERIOD_FRAMES * CHANNELS * 2);
    let mut switched = false;

    while started.elapsed() < RUN_TIME {
        bytes.clear();
        for _ in 0..PERIOD_FRAMES {
            let t = frame_index as f32 / DEFAULT_SAMPLE_RATE;
            let left = (TAU * TONES_HZ[0] * t).sin() * 0.5;
            let right = (TAU * TONES_HZ[1] * t).sin() * 0.25;
            for sample in [left, right] {
                bytes.extend(((sample * i16::MAX as f32) as i16).to_le_bytes());
            }
            frame_index += 1;
        }
        adapter.on_buffer(&bytes, SampleFormat::S16Le, CHANNELS, DEFAULT_SAMPLE_RATE);

        if !switched && started.elapsed() >= RUN_TIME / 2 {
            switched = true;
            analyzer.set_scale_type(FrequencyScale::Mel);
            gain.set_min_db(config.gain.min_db + 10.0);
        }
        thread::sleep(period);
    }

    adapter.cancel();
    let stats = analyzer.stats();
    analyzer.unsubscribe(subscription);
    analyzer.shutdown();
    info!(
        "spectrum-tap finished: {} frames, {} chunks dropped, {} results dropped",
        frames.load(Ordering::Relaxed),
        stats.dropped_chunks,
        stats.dropped_results
    );
    Ok(())
}
