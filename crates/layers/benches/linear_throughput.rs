use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layers::{Linear, LinearConfig, LinearInit, Placement};

fn bench_linear(c: &mut Criterion) {
    let device = Device::Cpu;
    let (batch, seq) = (2usize, 256usize);
    let shapes = &[(320usize, 320usize), (320, 2560), (1280, 320)];

    for &dtype in &[DType::BF16, DType::F32] {
        let placement = Placement::new(device.clone(), dtype);
        let mut group = c.benchmark_group(format!("linear/{dtype:?}"));
        for &(input_dim, output_dim) in shapes {
            let linear = Linear::with_init(
                LinearConfig::new(input_dim, output_dim),
                &LinearInit::XavierNormal,
                &placement,
            )
            .expect("linear init");
            let input = Tensor::randn(0f32, 1.0, (batch, seq, input_dim), &device)
                .expect("input")
                .to_dtype(dtype)
                .expect("cast input");
            group.throughput(Throughput::Elements((batch * seq * input_dim * output_dim) as u64));
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{input_dim}x{output_dim}")),
                &(linear, input),
                |b, (linear, input)| {
                    b.iter(|| black_box(linear.project(black_box(input)).expect("project")));
                },
            );
        }
        group.finish();
    }
}

criterion_group!(benches, bench_linear);
criterion_main!(benches);
