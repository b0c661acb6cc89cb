//! Backtesting harness
//!
//! Drives one [`StrategyOrchestrator`] per asset over its bar history with
//! a simulated broker standing in for the execution side. Orders fill on
//! the bar that produced them, at the close adjusted for slippage. Cash is
//! booked in [`Money`].
//!
//! Assets are independent, so [`Backtester::run_many`] runs them in
//! parallel with rayon.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::config::CommissionConfig;
use crate::engine::{CashAccount, Fill, IntentReason, OrderIntent, Rejection, StrategyOrchestrator};
use crate::ledger::Position;
use crate::{Candle, Config, Money, PerformanceMetrics, Side, Symbol, Trade};

/// Result of handing an intent to the broker
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Execution {
    Filled(Fill),
    Rejected(Rejection),
}

/// Cash account and market-order execution for one asset
#[derive(Debug, Clone)]
pub struct SimulatedBroker {
    cash: Money,
    holdings: f64,
    commission: CommissionConfig,
    slippage: f64,
}

impl SimulatedBroker {
    pub fn new(initial_cash: f64, commission: CommissionConfig, slippage: f64) -> Self {
        Self {
            cash: Money::from_f64(initial_cash),
            holdings: 0.0,
            commission,
            slippage,
        }
    }

    /// `size * price * percent + fixed fee`
    pub fn commission_for(&self, size: f64, price: f64) -> Money {
        Money::from_f64(size) * Money::from_f64(price) * Money::from_f64(self.commission.percent)
            + Money::from_f64(self.commission.fixed_fee())
    }

    /// Execute a market order at this bar's close
    pub fn execute(&mut self, intent: &OrderIntent, candle: &Candle) -> Execution {
        let price = match intent.side {
            Side::Buy => candle.close * (1.0 + self.slippage),
            Side::Sell => candle.close * (1.0 - self.slippage),
        };
        let value = Money::from_f64(price) * Money::from_f64(intent.quantity);
        let commission = self.commission_for(intent.quantity, price);

        match intent.side {
            Side::Buy => {
                let total = value + commission;
                if total > self.cash {
                    debug!(required = %total, cash = %self.cash, "Buy exceeds cash");
                    return Execution::Rejected(Rejection::Margin);
                }
                self.cash -= total;
                self.holdings += intent.quantity;
            }
            Side::Sell => {
                if intent.quantity > self.holdings {
                    return Execution::Rejected(Rejection::Canceled);
                }
                self.cash += value - commission;
                self.holdings -= intent.quantity;
            }
        }

        Execution::Filled(Fill {
            side: intent.side,
            price,
            quantity: intent.quantity,
            commission: commission.to_f64(),
            timestamp: candle.datetime,
        })
    }

    pub fn cash(&self) -> Money {
        self.cash
    }

    pub fn holdings(&self) -> f64 {
        self.holdings
    }

    /// Cash plus holdings marked at `price`
    pub fn equity(&self, price: f64) -> f64 {
        self.cash.to_f64() + self.holdings * price
    }
}

impl CashAccount for SimulatedBroker {
    fn available_cash(&self) -> f64 {
        self.cash.to_f64()
    }
}

/// Running totals for the cycle in progress
#[derive(Debug, Clone)]
struct OpenCycle {
    entry_time: DateTime<Utc>,
    buys: u32,
    cost: Money,
    commission: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub symbol: Symbol,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub metrics: PerformanceMetrics,
    /// Position still open after the last bar
    pub open_position: Position,
    pub migrated: bool,
    pub dead: bool,
}

impl BacktestResult {
    pub fn net_pnl(&self) -> f64 {
        self.metrics.final_value - self.metrics.initial_value
    }

    pub fn is_profitable(&self) -> bool {
        self.net_pnl() > 0.0
    }
}

/// Backtest engine
pub struct Backtester {
    config: Config,
}

impl Backtester {
    pub fn new(config: Config) -> Self {
        Backtester { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one asset over its full history
    pub fn run(&self, symbol: Symbol, candles: &[Candle]) -> Result<BacktestResult> {
        let bt = &self.config.backtest;
        let mut engine = StrategyOrchestrator::from_config(symbol.clone(), &self.config)?;
        let mut broker = SimulatedBroker::new(bt.initial_cash, bt.commission, bt.slippage);

        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(candles.len());
        let mut cycle: Option<OpenCycle> = None;

        for candle in candles {
            let intent = engine
                .on_bar(candle, &broker)
                .with_context(|| format!("{} at {}", symbol, candle.datetime))?;

            if let Some(intent) = intent {
                match broker.execute(&intent, candle) {
                    Execution::Filled(fill) => {
                        let avg_entry = engine.average_entry_price();
                        engine
                            .on_fill(&fill)
                            .with_context(|| format!("{} fill at {}", symbol, candle.datetime))?;
                        if let Some(trade) =
                            record_fill(&symbol, &mut cycle, &intent, &fill, avg_entry, &engine)
                        {
                            trades.push(trade);
                        }
                    }
                    Execution::Rejected(rejection) => engine.on_rejection(rejection)?,
                }
            }

            equity_curve.push((candle.datetime, broker.equity(candle.close)));
        }

        let metrics = calculate_metrics(bt.initial_cash, &trades, &equity_curve);
        info!(
            symbol = %symbol,
            policy = engine.policy_name(),
            trades = trades.len(),
            total_return = format!("{:.2}%", metrics.total_return),
            migrated = engine.is_migrated(),
            dead = engine.is_dead(),
            "Backtest finished"
        );

        Ok(BacktestResult {
            symbol,
            trades,
            equity_curve,
            metrics,
            open_position: *engine.position(),
            migrated: engine.is_migrated(),
            dead: engine.is_dead(),
        })
    }

    /// Run every asset independently. Results keep the input order.
    pub fn run_many(
        &self,
        assets: &[(Symbol, Vec<Candle>)],
        sequential: bool,
        progress: &ProgressBar,
    ) -> Vec<(Symbol, Result<BacktestResult>)> {
        let run_one = |(symbol, candles): &(Symbol, Vec<Candle>)| {
            let result = self.run(symbol.clone(), candles);
            progress.inc(1);
            (symbol.clone(), result)
        };

        if sequential {
            assets.iter().map(run_one).collect()
        } else {
            assets.par_iter().map(run_one).collect()
        }
    }
}

/// Book a fill into the open cycle; returns the trade when the cycle closes
fn record_fill(
    symbol: &Symbol,
    cycle: &mut Option<OpenCycle>,
    intent: &OrderIntent,
    fill: &Fill,
    avg_entry_before: f64,
    engine: &StrategyOrchestrator,
) -> Option<Trade> {
    let value = Money::from_f64(fill.price) * Money::from_f64(fill.quantity);
    let commission = Money::from_f64(fill.commission);

    match fill.side {
        Side::Buy => {
            let open = cycle.get_or_insert_with(|| OpenCycle {
                entry_time: fill.timestamp,
                buys: 0,
                cost: Money::ZERO,
                commission: Money::ZERO,
            });
            open.buys += 1;
            open.cost += value;
            open.commission += commission;
            None
        }
        Side::Sell => {
            if engine.position().is_open() {
                return None;
            }
            let open = cycle.take()?;
            let IntentReason::Exit(signal) = intent.reason else {
                return None;
            };
            let pnl = value - open.cost;
            let total_commission = open.commission + commission;
            Some(Trade {
                symbol: symbol.clone(),
                entry_time: open.entry_time,
                exit_time: fill.timestamp,
                average_entry_price: avg_entry_before,
                exit_price: fill.price,
                quantity: fill.quantity,
                buys: open.buys,
                exit_kind: signal.kind,
                cost: open.cost,
                proceeds: value,
                pnl,
                commission: total_commission,
                net_pnl: pnl - total_commission,
            })
        }
    }
}

/// Aggregate statistics from closed cycles and the per-bar equity curve
pub fn calculate_metrics(
    initial_value: f64,
    trades: &[Trade],
    equity_curve: &[(DateTime<Utc>, f64)],
) -> PerformanceMetrics {
    let final_value = equity_curve.last().map_or(initial_value, |(_, v)| *v);
    let total_return = if initial_value > 0.0 {
        (final_value - initial_value) / initial_value * 100.0
    } else {
        0.0
    };

    let net: Vec<f64> = trades.iter().map(|t| t.net_pnl.to_f64()).collect();
    let wins: Vec<f64> = net.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = net.iter().copied().filter(|p| *p <= 0.0).collect();

    let win_rate = if net.is_empty() {
        0.0
    } else {
        wins.len() as f64 / net.len() as f64 * 100.0
    };

    let gross_profits: f64 = wins.iter().sum();
    let gross_losses: f64 = losses.iter().map(|l| l.abs()).sum();
    let profit_factor = if gross_losses > 0.0 {
        gross_profits / gross_losses
    } else if gross_profits > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let avg_win = if wins.is_empty() {
        0.0
    } else {
        gross_profits / wins.len() as f64
    };
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        gross_losses / losses.len() as f64
    };
    let expectancy = if net.is_empty() {
        0.0
    } else {
        let p_win = wins.len() as f64 / net.len() as f64;
        p_win * avg_win - (1.0 - p_win) * avg_loss
    };

    let mut peak = initial_value;
    let mut max_dd: f64 = 0.0;
    for (_, equity) in equity_curve {
        peak = peak.max(*equity);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }

    PerformanceMetrics {
        initial_value,
        final_value,
        total_return,
        sharpe_ratio: sharpe_ratio(equity_curve),
        max_drawdown: max_dd * 100.0,
        win_rate,
        profit_factor,
        expectancy,
        total_trades: trades.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        avg_win,
        avg_loss,
        largest_win: wins.iter().copied().fold(0.0, f64::max),
        largest_loss: losses.iter().copied().fold(0.0, f64::min),
        total_commission: trades.iter().map(|t| t.commission.to_f64()).sum(),
        max_buys_in_cycle: trades.iter().map(|t| t.buys).max().unwrap_or(0),
    }
}

/// Annualized Sharpe of per-bar equity returns.
///
/// The mean uses every bar; volatility uses only bars where equity moved,
/// since flat (all-cash) bars carry no market risk.
fn sharpe_ratio(equity_curve: &[(DateTime<Utc>, f64)]) -> f64 {
    const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;
    const RISK_FREE_RATE: f64 = 0.05;

    if equity_curve.len() < 3 {
        return 0.0;
    }
    let span = (equity_curve[equity_curve.len() - 1].0 - equity_curve[0].0).num_seconds() as f64;
    if span <= 0.0 {
        return 0.0;
    }
    let bar_seconds = span / (equity_curve.len() - 1) as f64;
    let periods_per_year = SECONDS_PER_YEAR / bar_seconds;

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].1 > 0.0)
        .map(|w| (w[1].1 - w[0].1) / w[0].1)
        .collect();
    let active: Vec<f64> = returns.iter().copied().filter(|r| *r != 0.0).collect();
    if active.len() < 2 {
        return 0.0;
    }

    let excess = returns.iter().mean() - RISK_FREE_RATE / periods_per_year;
    let std_dev = active.iter().std_dev();
    if std_dev.is_finite() && std_dev > 0.0 {
        excess / std_dev * periods_per_year.sqrt()
    } else {
        0.0
    }
}

/// Portfolio view over many per-asset runs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub assets: usize,
    pub failed: usize,
    pub profitable: usize,
    pub migrated: usize,
    pub total_trades: usize,
    pub total_net_pnl: f64,
}

impl RunSummary {
    pub fn from_results(results: &[(Symbol, Result<BacktestResult>)]) -> Self {
        let mut summary = RunSummary {
            assets: results.len(),
            ..Default::default()
        };
        for (_, result) in results {
            match result {
                Ok(r) => {
                    summary.profitable += usize::from(r.is_profitable());
                    summary.migrated += usize::from(r.migrated);
                    summary.total_trades += r.trades.len();
                    summary.total_net_pnl += r.net_pnl();
                }
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }
}
