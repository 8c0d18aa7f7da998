use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::{Duration, Instant};
use strata_sds::{InProcessSds, ReaderPolicy, WriterPolicy};

const WORD: usize = 8;
const CAPACITY: usize = 65536;

fn bench_write(c: &mut Criterion) {
    let sds = InProcessSds::with_capacity(WORD, CAPACITY, 1).expect("failed to create stream");
    let mut writer = sds
        .create_writer(WriterPolicy::Nonblockable)
        .expect("failed to create writer");
    let word = 42u64.to_le_bytes();

    let mut group = c.benchmark_group("sds");
    group.throughput(Throughput::Elements(1));

    group.bench_function("write (nonblockable)", |b| {
        b.iter(|| writer.write(black_box(&word), Duration::ZERO));
    });

    drop(group);
}

fn bench_read_data(c: &mut Criterion) {
    let sds = InProcessSds::with_capacity(WORD, CAPACITY, 1).expect("failed to create stream");
    let mut writer = sds
        .create_writer(WriterPolicy::Nonblockable)
        .expect("failed to create writer");
    let mut reader = sds
        .create_reader(ReaderPolicy::Nonblocking)
        .expect("failed to create reader");
    let word = 42u64.to_le_bytes();
    let mut buf = [0u8; WORD];

    let mut group = c.benchmark_group("sds");
    group.throughput(Throughput::Elements(1));

    group.bench_function("read (data)", |b| {
        b.iter_custom(|iters| {
            let mut elapsed = Duration::ZERO;
            let mut left = iters as usize;
            // Refill in slices the ring can hold without overrunning the reader.
            while left > 0 {
                let batch = left.min(CAPACITY / 2);
                for _ in 0..batch {
                    let _ = writer.write(&word, Duration::ZERO);
                }
                let start = Instant::now();
                for _ in 0..batch {
                    let _ = black_box(reader.read(&mut buf, Duration::ZERO));
                }
                elapsed += start.elapsed();
                left -= batch;
            }
            elapsed
        });
    });

    drop(group);
}

fn bench_read_empty(c: &mut Criterion) {
    let sds = InProcessSds::with_capacity(WORD, CAPACITY, 1).expect("failed to create stream");
    let _writer = sds
        .create_writer(WriterPolicy::Nonblockable)
        .expect("failed to create writer");
    let mut reader = sds
        .create_reader(ReaderPolicy::Nonblocking)
        .expect("failed to create reader");
    let mut buf = [0u8; WORD];

    let mut group = c.benchmark_group("sds");
    group.throughput(Throughput::Elements(1));

    group.bench_function("read (empty)", |b| {
        b.iter(|| black_box(reader.read(&mut buf, Duration::ZERO)));
    });

    drop(group);
}

fn bench_round_trip_policies(c: &mut Criterion) {
    let mut group = c.benchmark_group("sds_round_trip");
    group.throughput(Throughput::Elements(1));

    for policy in [
        WriterPolicy::Nonblockable,
        WriterPolicy::AllOrNothing,
        WriterPolicy::Blocking,
    ] {
        let sds =
            InProcessSds::with_capacity(WORD, CAPACITY, 1).expect("failed to create stream");
        let mut writer = sds.create_writer(policy).expect("failed to create writer");
        let mut reader = sds
            .create_reader(ReaderPolicy::Nonblocking)
            .expect("failed to create reader");
        let word = 7u64.to_le_bytes();
        let mut buf = [0u8; WORD];

        group.bench_function(format!("{policy}"), |b| {
            b.iter(|| {
                let _ = writer.write(black_box(&word), Duration::ZERO);
                let _ = black_box(reader.read(&mut buf, Duration::ZERO));
            });
        });
    }

    group.finish();
}

fn bench_chunk_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("sds_chunk");

    for &words in &[1usize, 16, 160, 1024] {
        let sds =
            InProcessSds::with_capacity(WORD, CAPACITY, 1).expect("failed to create stream");
        let mut writer = sds
            .create_writer(WriterPolicy::Nonblockable)
            .expect("failed to create writer");
        let mut reader = sds
            .create_reader(ReaderPolicy::Nonblocking)
            .expect("failed to create reader");
        let chunk = vec![0xA5u8; words * WORD];
        let mut buf = vec![0u8; words * WORD];

        group.throughput(Throughput::Bytes((words * WORD) as u64));
        group.bench_function(format!("round_trip_{words}_words"), |b| {
            b.iter(|| {
                let _ = writer.write(black_box(&chunk), Duration::ZERO);
                let _ = black_box(reader.read(&mut buf, Duration::ZERO));
            });
        });
    }

    group.finish();
}

#[cfg(target_os = "linux")]
fn bench_shm_round_trip(c: &mut Criterion) {
    use strata_perf::shm_scratch_path;
    use strata_sds::ShmSds;

    let path = shm_scratch_path("crit_rt");
    let sds = ShmSds::create_file(&path, WORD, CAPACITY, 1).expect("failed to create stream");
    let mut writer = sds
        .create_writer(WriterPolicy::Nonblockable)
        .expect("failed to create writer");
    let mut reader = sds
        .create_reader(ReaderPolicy::Nonblocking)
        .expect("failed to create reader");
    let word = 7u64.to_le_bytes();
    let mut buf = [0u8; WORD];

    let mut group = c.benchmark_group("sds_shm");
    group.throughput(Throughput::Elements(1));

    group.bench_function("round_trip", |b| {
        b.iter(|| {
            let _ = writer.write(black_box(&word), Duration::ZERO);
            let _ = black_box(reader.read(&mut buf, Duration::ZERO));
        });
    });

    drop(group);
    drop(reader);
    drop(writer);
    drop(sds);
    let _ = std::fs::remove_file(&path);
}

#[cfg(not(target_os = "linux"))]
fn bench_shm_round_trip(_c: &mut Criterion) {}

criterion_group!(
    benches,
    bench_write,
    bench_read_data,
    bench_read_empty,
    bench_round_trip_policies,
    bench_chunk_sizes,
    bench_shm_round_trip,
);
criterion_main!(benches);
