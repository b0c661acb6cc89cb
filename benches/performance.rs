//! Performance benchmarks for dip-ladder
//!
//! Run with: `cargo bench`
//! View results: `open target/criterion/report/index.html`

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use dip_ladder::backtest::Backtester;
use dip_ladder::config::CommissionConfig;
use dip_ladder::indicators;
use dip_ladder::{Candle, Config, StrategyOrchestrator, Symbol};

/// Pump, long bleed with bounces, second pump. Prices sit in the 1e-4
/// range so the default price scale migrates them.
fn synthetic_candles(count: usize) -> Vec<Candle> {
    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut prev = 1.0e-4;
    (0..count)
        .map(|i| {
            let t = i as f64 / count as f64;
            let trend = if t < 0.5 { 1.0 - t } else { 0.5 + (t - 0.5) * 1.5 };
            let close = 1.2e-4 * trend * (1.0 + 0.08 * (i as f64 * 0.37).sin());
            let open = prev;
            prev = close;
            Candle::new_unchecked(
                start + Duration::minutes(i as i64),
                open,
                open.max(close) * 1.01,
                open.min(close) * 0.99,
                close,
                1000.0,
            )
        })
        .collect()
}

fn bench_config(strategy: &str) -> Config {
    let mut config = Config::default();
    config.set_strategy_name(strategy);
    config.backtest.commission = CommissionConfig::free();
    config
}

fn benchmark_indicators(c: &mut Criterion) {
    let closes: Vec<f64> = synthetic_candles(10_000).iter().map(|c| c.close).collect();
    c.bench_function("rsi_10k", |b| {
        b.iter(|| indicators::rsi(black_box(&closes), 15))
    });
}

fn benchmark_on_bar(c: &mut Criterion) {
    let candles = synthetic_candles(10_000);
    let config = bench_config("fibo_martingale");
    c.bench_function("on_bar_10k_no_fills", |b| {
        b.iter(|| {
            let mut engine =
                StrategyOrchestrator::from_config(Symbol::new("BENCH"), &config).unwrap();
            let mut intents = 0usize;
            for candle in &candles {
                if let Some(intent) = engine.on_bar(candle, &1e6).unwrap() {
                    intents += 1;
                    // drop the order so the engine keeps deciding
                    engine
                        .on_rejection(dip_ladder::Rejection::Canceled)
                        .unwrap();
                    black_box(intent);
                }
            }
            black_box(intents)
        })
    });
}

fn benchmark_backtest(c: &mut Criterion) {
    let candles = synthetic_candles(10_000);
    for strategy in ["simple_martingale", "fibo_martingale", "fibo_retrace"] {
        let backtester = Backtester::new(bench_config(strategy));
        c.bench_function(&format!("backtest_10k_{strategy}"), |b| {
            b.iter(|| {
                backtester
                    .run(Symbol::new("BENCH"), black_box(&candles))
                    .unwrap()
            })
        });
    }
}

criterion_group!(
    benches,
    benchmark_indicators,
    benchmark_on_bar,
    benchmark_backtest
);
criterion_main!(benches);
