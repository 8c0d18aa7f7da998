use std::hint::black_box;
use std::mem::size_of;
use std::sync::{Arc, Barrier};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use strata_perf::*;
use strata_sds::layout::{Header, Offsets};
use strata_sds::{
    InProcessSds, InProcessTraits, ReaderPolicy, Reference, SdsError, WriterPolicy,
};

const WORD: usize = 8;
const CAPACITY: usize = 4096;
const EVENTS: usize = 200_000;

/// Results of the writer thread → ring → reader thread section.
#[derive(Default)]
struct CrossThreadDiag {
    summary: Option<Summary>,
    overruns: u64,
    writer_stalls: u64,
}

fn main() {
    let rusage_start = Rusage::now();
    let mut results: Vec<Measurement> = Vec::new();

    print_banner();
    section_memory_layout();
    section_single_thread(&mut results);
    let cross_diag = section_cross_thread(&mut results);

    let usage = Rusage::now().since(&rusage_start);
    section_resources(&usage);

    save_results(&results, &cross_diag, &usage);
}

fn print_banner() {
    let bar = "\u{2550}".repeat(90);
    let ncpu = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(0);
    println!("{bar}");
    println!("  STRATA SDS PERF REPORT");
    println!("  cpus: {ncpu}   word: {WORD} B   capacity: {CAPACITY} words");
    println!("{bar}");
}

fn section_memory_layout() {
    heading("MEMORY LAYOUT  (in-process traits)");

    println!(
        "  {:<34} {:>10}",
        "Header",
        human_bytes(size_of::<Header<InProcessTraits>>() as u64)
    );
    println!("  {}", "─".repeat(60));
    println!(
        "  {:<16} {:>12} {:>12} {:>12}",
        "max_readers", "cursors @", "data @", "total"
    );
    for &readers in &[1usize, 4, 16, 255] {
        let offsets = Offsets::compute::<InProcessTraits>(WORD, readers);
        let total = InProcessSds::calculate_buffer_size(CAPACITY, WORD, readers).unwrap_or(0);
        println!(
            "  {:<16} {:>12} {:>12} {:>12}",
            readers,
            offsets.reader_cursor,
            offsets.data,
            human_bytes(total as u64),
        );
    }
}

fn section_single_thread(results: &mut Vec<Measurement>) {
    heading("SINGLE THREAD");
    LatencyTable::header();

    let Ok(sds) = InProcessSds::with_capacity(WORD, CAPACITY, 1) else {
        eprintln!("  [failed to create stream]");
        return;
    };
    let (Ok(mut writer), Ok(mut reader)) = (
        sds.create_writer(WriterPolicy::Nonblockable),
        sds.create_reader(ReaderPolicy::Nonblocking),
    ) else {
        eprintln!("  [failed to create writer or reader]");
        return;
    };
    let word = 1u64.to_le_bytes();
    let mut buf = [0u8; WORD];

    let m = time_per_op("write", 1_000, 1_000, || {
        let _ = black_box(writer.write(&word, Duration::ZERO));
    });
    record(results, m);

    // the reader fell behind during the write batch
    let _ = reader.seek(0, Reference::BeforeWriter);
    let m = time_per_op("read (empty)", 1_000, 1_000, || {
        let _ = black_box(reader.read(&mut buf, Duration::ZERO));
    });
    record(results, m);

    let m = time_per_op("write + read", 1_000, 1_000, || {
        let _ = writer.write(&word, Duration::ZERO);
        let _ = black_box(reader.read(&mut buf, Duration::ZERO));
    });
    record(results, m);

    let m = time_per_op("tell (before writer)", 1_000, 1_000, || {
        black_box(reader.tell(Reference::BeforeWriter));
    });
    record(results, m);
}

fn record(results: &mut Vec<Measurement>, m: Option<Measurement>) {
    if let Some(m) = m {
        LatencyTable::row(&m);
        results.push(m);
    }
}

fn section_cross_thread(results: &mut Vec<Measurement>) -> CrossThreadDiag {
    heading("CROSS THREAD  (writer thread \u{2192} ring \u{2192} blocking reader)");

    let mut diag = CrossThreadDiag::default();
    let Ok(sds) = InProcessSds::with_capacity(WORD, CAPACITY, 1) else {
        eprintln!("  [failed to create stream]");
        return diag;
    };
    let (Ok(mut writer), Ok(mut reader)) = (
        sds.create_writer(WriterPolicy::Blocking),
        sds.create_reader(ReaderPolicy::Blocking),
    ) else {
        eprintln!("  [failed to create writer or reader]");
        return diag;
    };

    let barrier = Arc::new(Barrier::new(2));
    let b2 = Arc::clone(&barrier);

    let consumer = std::thread::spawn(move || {
        let mut samples = Samples::with_capacity(EVENTS);
        let mut overruns = 0u64;
        let mut buf = [0u8; WORD];
        b2.wait();
        loop {
            match reader.read(&mut buf, Duration::from_secs(1)) {
                Ok(_) => {
                    let stamped = u64::from_le_bytes(buf);
                    samples.push(mono_now_ns().saturating_sub(stamped));
                }
                Err(SdsError::Overrun) => {
                    overruns += 1;
                    let _ = reader.seek(0, Reference::BeforeWriter);
                }
                Err(SdsError::TimedOut) => continue,
                Err(_) => break,
            }
        }
        (samples, overruns)
    });

    barrier.wait();
    let mut stalls = 0u64;
    for _ in 0..EVENTS {
        loop {
            match writer.write(&mono_now_ns().to_le_bytes(), Duration::from_millis(10)) {
                Ok(_) => break,
                Err(SdsError::TimedOut) => stalls += 1,
                Err(e) => {
                    eprintln!("  [write failed: {e}]");
                    break;
                }
            }
        }
    }
    writer.close();

    let Ok((mut samples, overruns)) = consumer.join() else {
        eprintln!("  [consumer thread panicked]");
        return diag;
    };

    diag.overruns = overruns;
    diag.writer_stalls = stalls;
    if let Some(summary) = samples.summarize() {
        let m = Measurement {
            name: "publish \u{2192} read",
            unit: "ns",
            summary,
        };
        LatencyTable::header();
        LatencyTable::row(&m);
        results.push(m);
        diag.summary = Some(summary);
    }
    println!("\n  events: {EVENTS}   overruns: {overruns}   writer stalls: {stalls}");
    diag
}

fn section_resources(usage: &Rusage) {
    heading("RESOURCE USAGE");

    println!("  {:<28} {}", "peak rss", human_bytes(usage.peak_rss_bytes));
    println!("  {:<28} {}", "minor faults", usage.minor_faults);
    println!("  {:<28} {}", "major faults", usage.major_faults);
    println!("  {:<28} {}", "voluntary switches", usage.voluntary_switches);
    println!(
        "  {:<28} {}",
        "involuntary switches", usage.involuntary_switches
    );
}

fn save_results(results: &[Measurement], cross_diag: &CrossThreadDiag, usage: &Rusage) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let results_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/results");
    let _ = std::fs::create_dir_all(results_dir);
    let json_path = format!("{results_dir}/{timestamp}_report.json");

    let output = serde_json::json!({
        "report_type": "sds",
        "timestamp": timestamp,
        "word_size": WORD,
        "capacity_words": CAPACITY,
        "benchmarks": results,
        "cross_thread": {
            "summary": cross_diag.summary,
            "overruns": cross_diag.overruns,
            "writer_stalls": cross_diag.writer_stalls,
        },
        "resources": usage,
    });

    let bar = "\u{2550}".repeat(90);
    let written = serde_json::to_string_pretty(&output)
        .map_err(std::io::Error::from)
        .and_then(|json| std::fs::write(&json_path, json));
    match written {
        Ok(()) => {
            println!("\n{bar}");
            println!("  Results saved to: {json_path}");
            println!("{bar}\n");
        }
        Err(e) => eprintln!("\n  [failed to save results: {e}]\n"),
    }
}
