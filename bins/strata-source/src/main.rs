mod tone;

use anyhow::Context;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use strata_config::{SourceConfig, setup_logging};
use strata_sds::{SdsError, ShmSds, WriterPolicy};
use tone::ToneGenerator;
use tracing::{debug, info};

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            SourceConfig::load(&path).with_context(|| format!("loading config from {path}"))?
        }
        None => SourceConfig::default(),
    };
    setup_logging(&config.stream.log_level);

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;

    let stream = &config.stream;
    let sds = ShmSds::create_file(
        &stream.shm_file_path,
        stream.word_size,
        stream.capacity_words,
        stream.max_readers,
    )
    .with_context(|| format!("failed to create stream at {}", stream.shm_file_path))?;
    let mut writer = sds.create_writer(WriterPolicy::Blocking)?;
    let mut tone = ToneGenerator::new(config.format, config.tone_hz)?;
    let frame_size = tone.frame_size();

    info!(
        path = %stream.shm_file_path,
        format = %config.format,
        capacity = stream.capacity_words,
        max_readers = stream.max_readers,
        tone_hz = config.tone_hz,
        "publishing tone"
    );

    let timeout = Duration::from_millis(config.write_timeout_ms);
    let rate = f64::from(config.format.sample_rate_hz);
    let started = Instant::now();
    let mut frames_total: u64 = 0;

    let mut last = Instant::now();
    let mut frames: u64 = 0;
    let mut stalls: u64 = 0;
    let mut chunk = Vec::new();

    while !shutdown.load(Ordering::Relaxed) {
        tone.fill(config.chunk_frames, &mut chunk);

        let mut offset = 0;
        while offset < chunk.len() && !shutdown.load(Ordering::Relaxed) {
            match writer.write(&chunk[offset..], timeout) {
                Ok(words) => offset += words * frame_size,
                Err(SdsError::TimedOut) => {
                    stalls += 1;
                    debug!("stream full, waiting on slowest reader");
                }
                Err(e) => return Err(e).context("stream write failed"),
            }
        }
        frames += (offset / frame_size) as u64;
        frames_total += (offset / frame_size) as u64;

        // pace to the sample clock
        let due = started + Duration::from_secs_f64(frames_total as f64 / rate);
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }

        if last.elapsed() >= Duration::from_secs(1) {
            info!(frames_per_sec = frames, stalls, "publish rate");
            frames = 0;
            stalls = 0;
            last = Instant::now();
        }
    }

    writer.close();
    info!(
        frames = writer.tell(),
        views = sds.reference_count(),
        "writer closed"
    );
    Ok(())
}
