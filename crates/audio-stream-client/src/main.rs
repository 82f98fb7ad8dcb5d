//! `audio-stream-client`: plays positional streams from a sender.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use audio_stream_client::cli::Args;
use audio_stream_client::config::{ClientConfig, ClientSettings};
use audio_stream_client::{device, runtime};

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_stream_client=info")
        }))
        .init();

    if args.list_devices {
        return device::list_devices(&cpal::default_host());
    }

    let cfg = match args.config.as_deref() {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    let settings = ClientSettings::resolve(&cfg, &args)?;
    runtime::run(settings)
}
