use anyhow::Context;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use strata_config::{SinkConfig, setup_logging};
use strata_sds::{ReaderPolicy, Reference, SdsError, ShmSds};
use tracing::{debug, info, warn};

const ATTACH_RETRY: Duration = Duration::from_millis(200);

/// Waits for a writer to format the stream file, then attaches to it.
fn attach(path: &str, shutdown: &AtomicBool) -> Option<ShmSds> {
    let mut logged = false;
    while !shutdown.load(Ordering::Relaxed) {
        match ShmSds::open_file(path) {
            Ok(sds) => return Some(sds),
            Err(e) => {
                if !logged {
                    info!(path, error = %e, "stream not ready, retrying");
                    logged = true;
                }
                thread::sleep(ATTACH_RETRY);
            }
        }
    }
    None
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            SinkConfig::load(&path).with_context(|| format!("loading config from {path}"))?
        }
        None => SinkConfig::default(),
    };
    setup_logging(&config.stream.log_level);

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;

    let path = config.stream.shm_file_path.as_str();
    let Some(sds) = attach(path, &shutdown) else {
        return Ok(());
    };
    let mut reader = sds
        .create_reader(ReaderPolicy::Blocking)
        .context("no free reader slot")?;
    let word_size = reader.word_size();

    info!(
        path,
        id = reader.id(),
        word_size,
        capacity = sds.data_size(),
        views = sds.reference_count(),
        "attached to stream"
    );

    let timeout = Duration::from_millis(config.read_timeout_ms);
    let report = Duration::from_millis(config.report_interval_ms);
    let mut buf = vec![0u8; word_size * 1024];

    let mut last = Instant::now();
    let mut words: u64 = 0;
    let mut overruns: u64 = 0;

    while !shutdown.load(Ordering::Relaxed) {
        match reader.read(&mut buf, timeout) {
            Ok(n) => words += n as u64,
            Err(SdsError::TimedOut) => debug!("no data within read timeout"),
            Err(SdsError::Overrun) => {
                overruns += 1;
                warn!(id = reader.id(), "reader overrun, skipping to live data");
                reader.seek(0, Reference::BeforeWriter)?;
            }
            Err(SdsError::Closed) => {
                info!(id = reader.id(), "writer closed the stream");
                break;
            }
            Err(e) => return Err(e).context("stream read failed"),
        }

        if last.elapsed() >= report {
            let secs = last.elapsed().as_secs_f64();
            info!(
                words_per_sec = (words as f64 / secs).round() as u64,
                lag = reader.tell(Reference::BeforeWriter),
                overruns,
                "consume rate"
            );
            words = 0;
            overruns = 0;
            last = Instant::now();
        }
    }

    info!(id = reader.id(), cursor = reader.tell(Reference::Absolute), "sink exiting");
    Ok(())
}
