use std::hint::black_box;
use std::sync::Arc;
use std::task::Poll;

use bencher::template_page;
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use micro_async_http::response::{BytesSource, TemplateProcessor};

fn render(page: &[u8], window: usize) -> usize {
    let mut processor = TemplateProcessor::new(Arc::new(|name: &str| match name {
        "HEAP" => "181236".to_string(),
        "UPTIME" => "86400".to_string(),
        _ => String::new(),
    }));
    let mut source = BytesSource::new(page.to_vec());
    let mut buf = vec![0u8; window];
    let mut total = 0;

    while let Poll::Ready(n) = processor.fill(&mut source, &mut buf) {
        if n == 0 {
            break;
        }
        total += n;
        black_box(&buf[..n]);
    }
    total
}

fn benchmark_template(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("template");

    for size in [1024, 16 * 1024] {
        let page = template_page(size);
        group.throughput(Throughput::Bytes(page.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &page, |b, page| {
            b.iter_batched(|| page.as_slice(), |page| render(page, 1436), BatchSize::SmallInput);
        });
    }

    group.finish();
}

criterion_group!(template, benchmark_template);
criterion_main!(template);
