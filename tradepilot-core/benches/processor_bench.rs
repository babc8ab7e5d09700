//! Criterion benchmarks for the per-bar hot path.
//!
//! Benchmarks:
//! 1. Full bar processor run over a synthetic session
//! 2. Entry scoring for both sides
//! 3. Rules regime detection with a small catalog

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tradepilot_core::components::{EntryScorer, WeightedScorer};
use tradepilot_core::config::{BotConfig, ScoringWeights};
use tradepilot_core::domain::{keys, FeatureSnapshot, Side};
use tradepilot_core::engine::BarProcessor;
use tradepilot_core::rules::{RulesDocument, RulesEngine};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_snapshots(n: usize) -> Vec<FeatureSnapshot> {
    let start = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.05).sin() * 5.0 + i as f64 * 0.01;
            let ts = start + Duration::minutes(5 * i as i64);
            FeatureSnapshot::new(ts, close - 0.1, close + 0.6, close - 0.6, close, 10_000.0)
                .with(keys::SMA_FAST, close - 0.5)
                .with(keys::SMA_SLOW, close - 1.0)
                .with(keys::RSI, 50.0 + (i as f64 * 0.3).sin() * 15.0)
                .with(keys::MACD, (i as f64 * 0.1).sin())
                .with(keys::MACD_SIGNAL, (i as f64 * 0.1 - 0.2).sin())
                .with(keys::ADX, 20.0 + (i as f64 * 0.02).cos() * 10.0)
                .with(keys::ATR, close * 0.008)
                .with(keys::BB_UPPER, close + 2.0)
                .with(keys::BB_MIDDLE, close)
                .with(keys::BB_LOWER, close - 2.0)
        })
        .collect()
}

const RULES: &str = r#"{
    "indicators": [{"id": "adx", "type": "adx"}, {"id": "rsi", "type": "rsi"}],
    "regimes": [
        {"id": "trending", "priority": 2, "conditions": {"left": {"indicator_id": "adx"}, "op": "gt", "right": {"value": 25}}},
        {"id": "ranging", "priority": 1, "conditions": {"left": {"indicator_id": "adx"}, "op": "lt", "right": {"value": 20}}}
    ]
}"#;

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_processor(c: &mut Criterion) {
    let mut group = c.benchmark_group("bar_processor");
    for n in [500usize, 5_000] {
        let snapshots = make_snapshots(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &snapshots, |b, snaps| {
            b.iter(|| {
                let mut p = BarProcessor::new(BotConfig::default()).unwrap();
                for s in snaps {
                    let out = p.process(s);
                    if out.intents.iter().any(|i| i.is_open()) {
                        let _ = p.on_order_filled(s.close, s.timestamp);
                    }
                }
                black_box(p.decisions().len())
            })
        });
    }
    group.finish();
}

fn bench_scoring(c: &mut Criterion) {
    let snapshots = make_snapshots(256);
    let scorer = WeightedScorer::new(ScoringWeights::default());
    c.bench_function("score_both_sides", |b| {
        b.iter(|| {
            for s in &snapshots {
                black_box(scorer.score(s, Side::Long).score);
                black_box(scorer.score(s, Side::Short).score);
            }
        })
    });
}

fn bench_rules(c: &mut Criterion) {
    let snapshots = make_snapshots(256);
    let engine = RulesEngine::new(RulesDocument::from_json(RULES).unwrap());
    c.bench_function("detect_regimes", |b| {
        b.iter(|| {
            for s in &snapshots {
                black_box(engine.detect(s).map(|m| m.len()).unwrap_or(0));
            }
        })
    });
}

criterion_group!(benches, bench_processor, bench_scoring, bench_rules);
criterion_main!(benches);
