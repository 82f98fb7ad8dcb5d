//! `audio-stream-server`: streams sound files to connected receivers.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use audio_stream_server::cli::Args;
use audio_stream_server::config::{ServerConfig, ServerSettings};
use audio_stream_server::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_stream_server=info")
        }))
        .init();

    let cfg = match args.config.as_deref() {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    let settings = ServerSettings::resolve(&cfg, &args)?;
    runtime::run(settings)
}
