//! List registered entry policies

use anyhow::Result;
use dip_ladder::strategies;

pub fn run() -> Result<()> {
    println!("Available strategies:");
    for name in strategies::available_policies() {
        println!("  - {}", name);
    }
    Ok(())
}
