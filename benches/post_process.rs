use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use sensevoice::remove_metadata;
use std::hint::black_box;

/// Representative engine output lines, from bare text to heavily tagged.
fn sample_lines() -> Vec<(&'static str, String)> {
    vec![
        ("plain", "The quick brown fox jumps over the lazy dog.".to_string()),
        (
            "annotated",
            "[0.00-3.42] <|en|><|NEUTRAL|><|Speech|><|withitn|>The quick brown fox jumps over the lazy dog."
                .to_string(),
        ),
        (
            "cjk",
            "[12.50-15.04] <|zh|><|HAPPY|><|Speech|><|withitn|>今天天气很好，我们去公园散步吧。".to_string(),
        ),
        (
            "long",
            (0..40)
                .map(|i| format!("[{i}.00-{}.50] <|en|>segment {i} ", i + 1))
                .collect::<String>(),
        ),
    ]
}

fn bench_remove_metadata(c: &mut Criterion) {
    let mut group = c.benchmark_group("remove_metadata");
    for (name, line) in sample_lines() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &line, |b, line| {
            b.iter(|| remove_metadata(black_box(line)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_remove_metadata);
criterion_main!(benches);
