use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use kiln_engine::{
    CorpusFile, ExtractOptions, InlinePool, Selector, SelectorOptions, TokenGraph, Trie,
    extract_candidates,
};

fn synthetic_text(words: usize) -> String {
    // Repetitive enough to produce shared candidates, varied enough to
    // keep the trie from collapsing.
    let stems = ["token", "vocab", "anneal", "corpus", "merge", "batch"];
    (0..words)
        .map(|i| format!("{}{} ", stems[i % stems.len()], i % 17))
        .collect()
}

fn bench_trie_sweep(c: &mut Criterion) {
    let text = synthetic_text(400);
    let cps: Vec<char> = text.chars().collect();
    c.bench_function("trie_sweep_400_words", |b| {
        b.iter(|| {
            let mut trie = Trie::new();
            for i in 0..cps.len() {
                let end = (i + 6).min(cps.len());
                trie.add_str(black_box(&cps[i..end]));
            }
            trie.node_count()
        })
    });
}

fn bench_selection_pass(c: &mut Criterion) {
    let text = synthetic_text(300);
    let file = Ok(CorpusFile {
        path: "bench.json".into(),
        texts: vec![text],
    });
    let options = ExtractOptions {
        max_len: 6,
        ..Default::default()
    };
    let tokens = extract_candidates([file], &options, &InlinePool);
    let selector = Selector::new(
        TokenGraph::new(tokens),
        &SelectorOptions {
            pref_token_count: 200,
            batch_size: Some(16),
            threads: Some(1),
            seed: Some(1),
        },
    );
    c.bench_function("selection_pass", |b| {
        b.iter(|| selector.run(&InlinePool, Some(1), |report| !black_box(report.score).is_nan()));
    });
}

criterion_group!(benches, bench_trie_sweep, bench_selection_pass);
criterion_main!(benches);
