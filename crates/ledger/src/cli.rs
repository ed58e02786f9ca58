use std::path::PathBuf;

use clap::Parser;
use rust_decimal::Decimal;

/// UTXO ledger service: admits blocks, rolls them back, and reports balances.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Address to bind the web server to.
    #[arg(long, default_value = "127.0.0.1", env = "LEDGER_BIND")]
    pub bind: String,

    /// Port to listen on.
    #[arg(long, default_value = "3000", env = "LEDGER_PORT")]
    pub port: u16,

    /// SQLite database file. If omitted, the ledger is in-memory only.
    #[arg(long, env = "LEDGER_DATABASE")]
    pub database: Option<PathBuf>,

    /// Address credited by the genesis block.
    #[arg(long, default_value = "genesis")]
    pub genesis_address: String,

    /// Amount credited by the genesis block.
    #[arg(long, default_value = "100000")]
    pub genesis_amount: Decimal,

    /// Drop all ledger tables before starting.
    #[arg(long)]
    pub reset: bool,
}
