// SPDX-License-Identifier: MIT OR Apache-2.0
//! Throughput benchmarks for page normalization and section hashing.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use gri_fingerprint::{page_sha, section_sha};

fn bench_page_sha(c: &mut Criterion) {
    let page: String = "The rules of combat  are resolved in\tinitiative order.\n"
        .repeat(64);
    c.bench_function("page_sha_3kb", |b| {
        b.iter(|| page_sha(black_box(&page)));
    });
}

fn bench_section_sha(c: &mut Criterion) {
    let shas: Vec<String> = (0..500).map(|i| page_sha(&format!("page {i}"))).collect();
    c.bench_function("section_sha_500_pages", |b| {
        b.iter(|| section_sha(black_box(&shas)));
    });
}

criterion_group!(benches, bench_page_sha, bench_section_sha);
criterion_main!(benches);
