use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "audio-stream-client", version)]
pub struct Args {
    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Sender address, e.g. 192.168.1.10:5600
    #[arg(long)]
    pub server: Option<String>,

    /// Output device name substring (case-insensitive)
    #[arg(long)]
    pub device: Option<String>,

    /// Preferred output sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Ask the sender for each chunk (use when the sender runs with --delivery pull)
    #[arg(long)]
    pub request_chunks: bool,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,
}
