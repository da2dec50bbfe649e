use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use throng::chaining::MichaelSet;
use throng::hopscotch::SpinHopscotchSet;
use throng::linear_probe::LinearProbeSet;
use throng::reclaim::{EpochReclaimer, LeakyReclaimer};
use throng::robin_hood_elided::ElidedRobinHoodSet;
use throng::robin_hood_kcas::KCasRobinHoodSet;
use throng::set::ConcurrentSet;

const TABLE_BITS: usize = 16;
const TABLE_SIZE: usize = 1 << TABLE_BITS;
const OPS_PER_ITER: u64 = 10_000;

fn preload<T: ConcurrentSet<usize>>(set: &T) {
    let mut rng = SmallRng::seed_from_u64(1);
    let mut inserted = 0;
    while inserted < TABLE_SIZE * 2 / 5 {
        if set.add(rng.gen_range(0..TABLE_SIZE), 0) {
            inserted += 1;
        }
    }
}

// The single-threaded mixed workload (90% reads, 5% adds, 5% removes),
// mirroring the benchmark binary's default shape per algorithm.
fn mixed_ops<T: ConcurrentSet<usize>>(set: &T, rng: &mut SmallRng) -> u64 {
    let mut hits = 0;
    for _ in 0..OPS_PER_ITER {
        let key = rng.gen_range(0..TABLE_SIZE);
        match rng.gen_range(0..100u8) {
            0..=89 => {
                if set.contains(key, 0) {
                    hits += 1;
                }
            }
            90..=94 => {
                set.add(key, 0);
            }
            _ => {
                set.remove(key, 0);
            }
        }
    }
    hits
}

fn bench_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_single_thread");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    macro_rules! bench_set {
        ($label:expr, $ty:ty) => {
            let set = <$ty>::with_capacity(TABLE_SIZE, 1);
            assert!(set.thread_init(0));
            preload(&set);
            let mut rng = SmallRng::seed_from_u64(2);
            group.bench_function(BenchmarkId::from_parameter($label), |b| {
                b.iter(|| black_box(mixed_ops(&set, &mut rng)))
            });
        };
    }

    bench_set!("rh_brown_set", KCasRobinHoodSet<LeakyReclaimer>);
    bench_set!("trans_rh_set", ElidedRobinHoodSet);
    bench_set!("hopscotch_set", SpinHopscotchSet);
    bench_set!("lf_lp_node_set", LinearProbeSet<EpochReclaimer>);
    bench_set!("mm_set", MichaelSet<EpochReclaimer>);

    group.finish();
}

fn bench_contains_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("contains_hit");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    macro_rules! bench_set {
        ($label:expr, $ty:ty) => {
            let set = <$ty>::with_capacity(TABLE_SIZE, 1);
            assert!(set.thread_init(0));
            for key in 0..TABLE_SIZE / 2 {
                set.add(key, 0);
            }
            group.bench_function(BenchmarkId::from_parameter($label), |b| {
                b.iter(|| {
                    let mut hits = 0u64;
                    for key in 0..OPS_PER_ITER as usize {
                        if set.contains(key % (TABLE_SIZE / 2), 0) {
                            hits += 1;
                        }
                    }
                    black_box(hits)
                })
            });
        };
    }

    bench_set!("rh_brown_set", KCasRobinHoodSet<LeakyReclaimer>);
    bench_set!("trans_rh_set", ElidedRobinHoodSet);
    bench_set!("hopscotch_set", SpinHopscotchSet);
    bench_set!("lf_lp_node_set", LinearProbeSet<EpochReclaimer>);
    bench_set!("mm_set", MichaelSet<EpochReclaimer>);

    group.finish();
}

criterion_group!(benches, bench_mixed, bench_contains_hit);
criterion_main!(benches);
