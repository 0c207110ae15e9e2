//! Benchmarks for the pipeline's hot paths: dedup key derivation,
//! canonical URL normalization, and embedding text assembly.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use sha2::{Digest, Sha256};
use url::Url;

fn canonicalize_url(url_str: &str) -> String {
    let mut url = Url::parse(url_str).unwrap();
    url.set_fragment(None);
    if let Some(host) = url.host_str() {
        let lower = host.to_lowercase();
        url.set_host(Some(&lower)).unwrap();
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !["ref", "source"].contains(&k.as_ref()) && !k.starts_with("utm_"))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    url.set_query(None);
    if !kept.is_empty() {
        let query = kept.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
        url.set_query(Some(&query));
    }
    let mut p = url.path().to_string();
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    url.set_path(&p);
    url.to_string()
}

fn bench_url_canonicalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("url_canonicalization");
    let urls = [
        "https://Example.com/Articles/42?utm_source=newsletter&utm_medium=email&ref=feed#s2",
        "https://news.example.org/2024/01/15/breaking-story/",
        "https://feeds.example.net/rss?category=tech&page=3",
    ];

    group.throughput(Throughput::Elements(urls.len() as u64));
    group.bench_function("canonicalize_batch", |b| {
        b.iter(|| {
            for url in &urls {
                black_box(canonicalize_url(url));
            }
        })
    });

    group.finish();
}

fn bench_dedup_key_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup_key_hashing");

    for size in [64, 512, 4096].iter() {
        let content = format!("{}|2024-01-15T10:00:00Z", "x".repeat(*size));
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(format!("title_{size}b"), &content, |b, content| {
            b.iter(|| {
                let mut hasher = Sha256::new();
                hasher.update(content.as_bytes());
                black_box(hex::encode(hasher.finalize()))
            })
        });
    }

    group.finish();
}

fn bench_embedding_text_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("embedding_text_assembly");

    let title = "A mid-length article title about distributed systems";
    let body = "Lorem ipsum dolor sit amet. ".repeat(400);
    let excerpt = "A short excerpt distinct from the title.";

    group.bench_function("assemble_and_truncate", |b| {
        b.iter(|| {
            let snippet: String = body.chars().take(2000).collect();
            let mut input = format!("{title} {snippet}");
            if excerpt != title {
                input.push(' ');
                input.push_str(excerpt);
            }
            let truncated: String = input.chars().take(8192).collect();
            black_box(truncated)
        })
    });

    group.finish();
}

fn bench_keyword_filter_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyword_filter_matching");

    let text = "Breaking news about distributed databases, consensus protocols, \
                and replication strategies in modern storage engines."
        .to_lowercase();
    let keywords = ["databases", "consensus", "sharding", "vector clocks"];

    group.bench_function("contains_any", |b| {
        b.iter(|| black_box(keywords.iter().any(|k| text.contains(k))))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_url_canonicalization,
    bench_dedup_key_hashing,
    bench_embedding_text_assembly,
    bench_keyword_filter_matching,
);

criterion_main!(benches);
