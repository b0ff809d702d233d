//! Kernel throughput across sequence lengths, with and without chunking.
//! Run with: `cargo bench -p attention throughput`

use attention::{AttentionKernel, Config, ExactAttention, Precision};
use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const BATCH: usize = 2;
const HEADS: usize = 8;
const HEAD_DIM: usize = 40;

fn qkv(seq_len: usize, dtype: DType, device: &Device) -> [Tensor; 3] {
    let make = || {
        Tensor::randn(0f32, 1.0, (BATCH, HEADS, seq_len, HEAD_DIM), device)
            .and_then(|t| t.to_dtype(dtype))
            .expect("input")
    };
    [make(), make(), make()]
}

fn bench_kernels(c: &mut Criterion) {
    let device = Device::Cpu;
    let whole = ExactAttention::new();
    let chunked = ExactAttention::with_config(Config {
        max_score_elements: 1 << 20,
        ..Config::default()
    });
    let inherit = ExactAttention::with_config(Config {
        precision: Precision::Inherit,
        ..Config::default()
    });

    for &dtype in &[DType::F32, DType::BF16] {
        let mut group = c.benchmark_group(format!("exact/{dtype:?}"));
        group.sample_size(10);
        for &seq_len in &[64usize, 256, 1024] {
            let [q, k, v] = qkv(seq_len, dtype, &device);
            group.throughput(Throughput::Elements((BATCH * HEADS * seq_len * seq_len) as u64));
            let kernels = [("whole", &whole), ("chunked", &chunked), ("inherit", &inherit)];
            for (label, kernel) in kernels {
                group.bench_with_input(BenchmarkId::new(label, seq_len), &seq_len, |b, _| {
                    b.iter(|| black_box(kernel.attend(&q, &k, &v, true).expect("attend")))
                });
            }
        }
        group.finish();
    }
}

criterion_group!(benches, bench_kernels);
criterion_main!(benches);
