//! Configuration loading and parsing.
//!
//! The TOML schema keeps every field optional; [`ServerSettings::resolve`] merges it with the
//! CLI overrides and fills defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use audio_stream_proto::PlaybackLimits;
use serde::Deserialize;

use crate::cli::Args;

pub const DEFAULT_BIND: &str = "0.0.0.0:5600";
pub const DEFAULT_SOUNDS_DIR: &str = "sounds";
pub const DEFAULT_CHUNK_SIZE: usize = 8192;
pub const DEFAULT_CHUNKS_PER_TICK: usize = 4;
pub const DEFAULT_TICK_RATE_HZ: u32 = 20;

/// How chunks are scheduled to recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Send up to `chunks_per_tick` chunks every tick.
    #[default]
    Push,
    /// Send one chunk per `RequestNextChunk` received (still capped per tick).
    Pull,
}

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Root directory play requests are resolved against.
    pub sounds_dir: Option<String>,
    /// Bytes per `StreamData` chunk.
    pub chunk_size: Option<usize>,
    /// Max chunks a session may emit per tick.
    pub chunks_per_tick: Option<usize>,
    /// Scheduler heartbeat.
    pub tick_rate_hz: Option<u32>,
    pub delivery: Option<DeliveryMode>,
    /// Log an info line whenever a stream starts.
    pub log_stream_events: Option<bool>,
    /// Defaults applied to play requests that omit them.
    pub defaults: Option<PlayDefaultsConfig>,
}

/// Default per-stream limits from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct PlayDefaultsConfig {
    pub range: Option<f32>,
    pub volume: Option<f32>,
    pub pitch: Option<f32>,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Chunking policy applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub chunk_size: usize,
    pub chunks_per_tick: usize,
    pub delivery: DeliveryMode,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunks_per_tick: DEFAULT_CHUNKS_PER_TICK,
            delivery: DeliveryMode::Push,
        }
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub sounds_dir: PathBuf,
    pub policy: ChunkPolicy,
    pub tick_interval: Duration,
    pub log_stream_events: bool,
    pub defaults: PlaybackLimits,
}

impl ServerSettings {
    /// Merge file config with CLI overrides (CLI wins) and validate.
    pub fn resolve(cfg: &ServerConfig, args: &Args) -> Result<Self> {
        let bind_raw = args
            .bind
            .clone()
            .or_else(|| cfg.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_raw
            .parse()
            .with_context(|| format!("parse bind {bind_raw}"))?;

        let sounds_dir = args
            .sounds_dir
            .clone()
            .or_else(|| cfg.sounds_dir.as_deref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOUNDS_DIR));

        let chunk_size = cfg.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 || chunk_size as u64 > u64::from(audio_stream_proto::MAX_PAYLOAD_LEN) / 2 {
            return Err(anyhow!("chunk_size out of range: {chunk_size}"));
        }
        let chunks_per_tick = cfg.chunks_per_tick.unwrap_or(DEFAULT_CHUNKS_PER_TICK).max(1);
        let delivery = args.delivery.or(cfg.delivery).unwrap_or_default();

        let tick_rate_hz = cfg.tick_rate_hz.unwrap_or(DEFAULT_TICK_RATE_HZ);
        if tick_rate_hz == 0 || tick_rate_hz > 1000 {
            return Err(anyhow!("tick_rate_hz out of range: {tick_rate_hz}"));
        }

        let mut defaults = PlaybackLimits::default();
        if let Some(d) = cfg.defaults.as_ref() {
            defaults.max_distance = d.range.unwrap_or(defaults.max_distance);
            defaults.gain = d.volume.unwrap_or(defaults.gain);
            defaults.pitch = d.pitch.unwrap_or(defaults.pitch);
        }

        Ok(Self {
            bind,
            sounds_dir,
            policy: ChunkPolicy {
                chunk_size,
                chunks_per_tick,
                delivery,
            },
            tick_interval: Duration::from_micros(1_000_000 / u64::from(tick_rate_hz)),
            log_stream_events: cfg.log_stream_events.unwrap_or(true),
            defaults,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["audio-stream-server"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn resolve_uses_defaults_for_empty_config() {
        let settings = ServerSettings::resolve(&ServerConfig::default(), &args(&[])).unwrap();
        assert_eq!(settings.bind.port(), 5600);
        assert_eq!(settings.sounds_dir, PathBuf::from("sounds"));
        assert_eq!(settings.policy, ChunkPolicy::default());
        assert_eq!(settings.tick_interval, Duration::from_millis(50));
        assert_eq!(settings.defaults, PlaybackLimits::default());
    }

    #[test]
    fn cli_overrides_file_values() {
        let cfg: ServerConfig = toml::from_str(
            r#"
            bind = "127.0.0.1:7000"
            sounds_dir = "/srv/sounds"
            delivery = "push"
            "#,
        )
        .unwrap();
        let settings = ServerSettings::resolve(
            &cfg,
            &args(&["--bind", "127.0.0.1:7001", "--delivery", "pull"]),
        )
        .unwrap();
        assert_eq!(settings.bind.port(), 7001);
        assert_eq!(settings.sounds_dir, PathBuf::from("/srv/sounds"));
        assert_eq!(settings.policy.delivery, DeliveryMode::Pull);
    }

    #[test]
    fn parses_chunking_and_defaults_tables() {
        let cfg: ServerConfig = toml::from_str(
            r#"
            chunk_size = 4096
            chunks_per_tick = 2
            tick_rate_hz = 10
            log_stream_events = false

            [defaults]
            range = 32.0
            volume = 0.5
            "#,
        )
        .unwrap();
        let settings = ServerSettings::resolve(&cfg, &args(&[])).unwrap();
        assert_eq!(settings.policy.chunk_size, 4096);
        assert_eq!(settings.policy.chunks_per_tick, 2);
        assert_eq!(settings.tick_interval, Duration::from_millis(100));
        assert!(!settings.log_stream_events);
        assert_eq!(settings.defaults.max_distance, 32.0);
        assert_eq!(settings.defaults.gain, 0.5);
        assert_eq!(settings.defaults.pitch, 1.0);
    }

    #[test]
    fn rejects_zero_chunk_size_and_tick_rate() {
        let cfg: ServerConfig = toml::from_str("chunk_size = 0").unwrap();
        assert!(ServerSettings::resolve(&cfg, &args(&[])).is_err());
        let cfg: ServerConfig = toml::from_str("tick_rate_hz = 0").unwrap();
        assert!(ServerSettings::resolve(&cfg, &args(&[])).is_err());
    }
}
