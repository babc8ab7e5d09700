//! Rules bridge driving the bar processor: regime routing, strategy gates,
//! strategy risk blocks and overrides, take-profit exits.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tradepilot_core::config::BotConfig;
use tradepilot_core::domain::{keys, DecisionAction, FeatureSnapshot, OrderIntent, RegimeType};
use tradepilot_core::engine::{BarProcessor, BotState};
use tradepilot_core::rules::{RulesDocument, RulesEngine};

const DOC: &str = r#"{
    "indicators": [
        {"id": "adx", "type": "adx"},
        {"id": "rsi", "type": "rsi", "params": {"period": 14}}
    ],
    "regimes": [
        {"id": "trending_up", "name": "Trending Up", "priority": 5, "regime_type": "trend_up",
         "conditions": {"left": {"indicator_id": "adx"}, "op": "gt", "right": {"value": 25}}},
        {"id": "ranging", "name": "Ranging", "priority": 1,
         "conditions": {"left": {"indicator_id": "adx"}, "op": "lt", "right": {"value": 20}}}
    ],
    "strategies": [
        {"id": "momentum_long", "side": "long",
         "entry": {"left": {"indicator_id": "rsi"}, "op": "gt", "right": {"value": 55}},
         "exit": {"left": {"indicator_id": "rsi"}, "op": "gt", "right": {"value": 80}},
         "risk": {"position_size": 2.0, "stop_loss": 1.0, "take_profit": 2.0}}
    ],
    "strategy_sets": [
        {"id": "trend_set", "strategies": [{"strategy_id": "momentum_long", "overrides": {"stop_loss": 1.5}}]}
    ],
    "routing": [{"strategy_set_id": "trend_set", "match": {"all_of": ["trending_up"]}}]
}"#;

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 14, 0, 0).unwrap() + Duration::minutes(minute)
}

fn bar(minute: i64, close: f64, adx: f64, rsi: f64) -> FeatureSnapshot {
    FeatureSnapshot::new(at(minute), close, close + 0.2, close - 0.2, close, 1_000.0)
        .with(keys::SMA_FAST, close - 1.0)
        .with(keys::SMA_SLOW, close - 2.0)
        .with(keys::RSI, rsi)
        .with(keys::MACD, 0.5)
        .with(keys::MACD_SIGNAL, 0.3)
        .with(keys::ADX, adx)
        .with(keys::PLUS_DI, 30.0)
        .with(keys::MINUS_DI, 15.0)
        .with(keys::BB_UPPER, close + 3.0)
        .with(keys::BB_MIDDLE, close - 1.0)
        .with(keys::BB_LOWER, close - 4.0)
}

fn processor() -> BarProcessor {
    let rules = RulesEngine::new(RulesDocument::from_json(DOC).unwrap());
    assert!(rules.warnings().is_empty(), "{:?}", rules.warnings());
    BarProcessor::new(BotConfig::default()).unwrap().with_rules(rules)
}

#[test]
fn routed_strategy_sets_name_size_and_overridden_stop() {
    let mut p = processor();
    let first = p.process(&bar(0, 100.0, 30.0, 60.0));
    assert_eq!(first.decision.regime, RegimeType::TrendUp);
    assert_eq!(first.decision.strategy.as_deref(), Some("momentum_long"));
    assert_eq!(p.state(), BotState::Signal);

    let second = p.process(&bar(5, 100.0, 30.0, 60.0));
    match &second.intents[..] {
        [OrderIntent::Open { quantity, stop, .. }] => {
            assert_eq!(*quantity, 2.0);
            assert!((stop - 98.5).abs() < 1e-9, "override stop_loss 1.5% expected, got {stop}");
        }
        other => panic!("expected an open intent, got {other:?}"),
    }
    let overlay = p.rules().unwrap().active_overlay().unwrap();
    assert_eq!(overlay.set_ids(), ["trend_set".to_string()]);
}

#[test]
fn unmet_strategy_entry_blocks() {
    let mut p = processor();
    let out = p.process(&bar(0, 100.0, 30.0, 52.0));
    assert_eq!(out.decision.action, DecisionAction::NoTrade);
    assert_eq!(out.decision.reasons, vec!["strategy_gate", "not_met:momentum_long"]);
    assert_eq!(p.state(), BotState::Flat);
}

#[test]
fn unrouted_regime_uses_builtin_path() {
    let mut p = processor();
    let out = p.process(&bar(0, 100.0, 15.0, 60.0));
    assert_eq!(out.decision.regime, RegimeType::Range);
    assert_eq!(out.decision.strategy.as_deref(), Some("weighted"));
    assert!(p.rules().unwrap().active_overlay().is_none());
}

#[test]
fn take_profit_closes_position() {
    let mut p = processor();
    p.process(&bar(0, 100.0, 30.0, 60.0));
    p.process(&bar(5, 100.0, 30.0, 60.0));
    p.on_order_filled(100.0, at(5)).unwrap();

    let hold = p.process(&bar(10, 101.0, 30.0, 60.0));
    assert_ne!(hold.decision.action, DecisionAction::Exit);

    let out = p.process(&bar(15, 102.5, 30.0, 60.0));
    assert_eq!(out.decision.action, DecisionAction::Exit);
    assert_eq!(out.decision.reasons[0], "strategy_exit");
    assert!((out.closed_trade.unwrap().exit_price - 102.5).abs() < 1e-9);
}

#[test]
fn strategy_exit_tree_fires_after_builtin_checks() {
    let mut config = BotConfig::default();
    config.exit.rsi_overbought = 90.0;
    let rules = RulesEngine::new(RulesDocument::from_json(DOC).unwrap());
    let mut p = BarProcessor::new(config).unwrap().with_rules(rules);
    p.process(&bar(0, 100.0, 30.0, 60.0));
    p.process(&bar(5, 100.0, 30.0, 60.0));
    p.on_order_filled(100.0, at(5)).unwrap();

    // Above the strategy exit line, below the RSI-extreme threshold.
    let out = p.process(&bar(10, 100.2, 30.0, 82.0));
    assert_eq!(out.decision.action, DecisionAction::Exit);
    assert_eq!(out.decision.reasons[0], "strategy_exit");
    assert!(matches!(&out.intents[..], [OrderIntent::Close { urgency: 2, .. }]));
}

#[test]
fn wick_stop_outranks_strategy_exit() {
    let mut p = processor();
    p.process(&bar(0, 100.0, 30.0, 60.0));
    p.process(&bar(5, 100.0, 30.0, 60.0));
    p.on_order_filled(100.0, at(5)).unwrap();

    let mut s = bar(10, 100.0, 30.0, 82.0);
    s.low = 98.0;
    let out = p.process(&s);
    assert_eq!(out.decision.reasons[0], "stop_hit");
}
