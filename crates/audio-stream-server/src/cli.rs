use std::path::PathBuf;

use clap::Parser;

use crate::config::DeliveryMode;

#[derive(Parser, Debug)]
#[command(name = "audio-stream-server", version)]
pub struct Args {
    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// TCP bind address for receivers, e.g. 0.0.0.0:5600
    #[arg(long)]
    pub bind: Option<String>,

    /// Root directory that play requests are resolved against
    #[arg(long)]
    pub sounds_dir: Option<PathBuf>,

    /// Chunk delivery mode (push sends every tick, pull waits for receiver requests)
    #[arg(long, value_enum)]
    pub delivery: Option<DeliveryMode>,
}
