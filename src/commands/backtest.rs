//! Backtest command implementation

use anyhow::{Context, Result};
use dip_ladder::backtest::{Backtester, RunSummary};
use dip_ladder::{data, Config};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use tracing::{info, warn};

pub fn run(
    config_path: String,
    data_override: Option<String>,
    strategy_override: Option<String>,
    cash_override: Option<f64>,
    sequential: bool,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(strategy) = strategy_override {
        info!("Overriding strategy to: {}", strategy);
        config.set_strategy_name(&strategy);
    }
    if let Some(cash) = cash_override {
        info!("Overriding initial cash to: {:.2}", cash);
        config.backtest.initial_cash = cash;
    }
    if let Some(path) = data_override {
        config.backtest.data_dir = path;
    }
    config.validate().context("Invalid configuration after overrides")?;

    let assets = data::load_assets(&config.backtest.data_dir)?;
    if assets.is_empty() {
        anyhow::bail!("No usable data found in {}", config.backtest.data_dir);
    }
    info!(
        assets = assets.len(),
        strategy = %config.strategy_name(),
        "Running backtests"
    );

    let pb = ProgressBar::new(assets.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}] {msg}")
            .context("Invalid progress template")?
            .progress_chars("█░ "),
    );
    pb.set_message(config.strategy_name());

    let backtester = Backtester::new(config.clone());
    let results = backtester.run_many(&assets, sequential, &pb);
    pb.finish_and_clear();

    println!("\n{}", "=".repeat(96));
    println!(
        "BACKTEST RESULTS  strategy={}  initial cash={:.2}",
        config.strategy_name(),
        config.backtest.initial_cash
    );
    println!("{}", "=".repeat(96));
    println!(
        "{:<20} {:>8} {:>10} {:>10} {:>8} {:>8} {:>10} {:>10} {:>6}",
        "Asset", "Trades", "Return%", "MaxDD%", "Win%", "Sharpe", "Net PnL", "Commission", "Open"
    );
    println!("{}", "-".repeat(96));

    for (symbol, result) in results.iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
        match result {
            Ok(r) => {
                let m = &r.metrics;
                println!(
                    "{:<20} {:>8} {:>10.2} {:>10.2} {:>8.1} {:>8.2} {:>10.4} {:>10.4} {:>6}",
                    symbol.as_str(),
                    m.total_trades,
                    m.total_return,
                    m.max_drawdown,
                    m.win_rate,
                    m.sharpe_ratio,
                    r.net_pnl(),
                    m.total_commission,
                    if r.open_position.is_open() { "yes" } else { "-" },
                );
            }
            Err(e) => {
                warn!(symbol = %symbol, "Backtest failed: {:#}", e);
                println!("{:<20} FAILED: {:#}", symbol.as_str(), e);
            }
        }
    }

    let summary = RunSummary::from_results(&results);
    println!("{}", "-".repeat(96));
    println!(
        "{} of {} profitable  ({} migrated, {} failed)",
        summary.profitable, summary.assets, summary.migrated, summary.failed
    );
    println!("Total trades:       {}", summary.total_trades);
    println!("Total net PnL:      {:.4}", summary.total_net_pnl);
    println!("{}", "=".repeat(96));

    info!(
        profitable = summary.profitable,
        assets = summary.assets,
        total_net_pnl = summary.total_net_pnl,
        "Backtest completed"
    );
    Ok(())
}
