//! Configuration loading and parsing.
//!
//! Every TOML field is optional; [`ClientSettings::resolve`] merges the file with CLI overrides.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use audio_stream_proto::Vec3;
use serde::Deserialize;

use crate::cli::Args;

pub const DEFAULT_SERVER: &str = "127.0.0.1:5600";
pub const DEFAULT_TICK_RATE_HZ: u32 = 20;
pub const DEFAULT_POOL_CAPACITY: usize = 32;
pub const DEFAULT_BUFFER_SLOTS: usize = 3;
pub const DEFAULT_FRAMES_PER_BUFFER: usize = 4096;
pub const DEFAULT_INITIAL_BUFFER_BYTES: usize = 1024 * 1024;
pub const DEFAULT_REFERENCE_DISTANCE: f32 = 16.0;
pub const DEFAULT_ROLLOFF: f32 = 1.0;
pub const DEFAULT_VOICE_WAIT_SECS: u64 = 30;

/// Top-level receiver configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ClientConfig {
    /// Sender address (host:port).
    pub server: Option<String>,
    /// Output device name substring.
    pub device: Option<String>,
    /// Preferred output sample rate.
    pub sample_rate: Option<u32>,
    pub tick_rate_hz: Option<u32>,
    /// Send `RequestNextChunk` (sender in pull delivery).
    pub request_chunks: Option<bool>,
    /// Listener position `[x, y, z]`.
    pub listener: Option<[f64; 3]>,
    pub engine: Option<EngineFileConfig>,
}

/// `[engine]` table.
#[derive(Debug, Default, Deserialize)]
pub struct EngineFileConfig {
    pub pool_capacity: Option<usize>,
    pub buffer_slots: Option<usize>,
    pub frames_per_buffer: Option<usize>,
    pub initial_buffer_bytes: Option<usize>,
    pub reference_distance: Option<f32>,
    pub rolloff: Option<f32>,
    /// Drop a stream that waited this long for a voice; 0 waits forever.
    pub voice_wait_timeout_secs: Option<u64>,
}

impl ClientConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ClientConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Tunables of the stream engine (registry, pool, decoder, pipeline).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub pool_capacity: usize,
    pub buffer_slots: usize,
    pub frames_per_buffer: usize,
    pub initial_buffer_bytes: usize,
    pub reference_distance: f32,
    pub rolloff: f32,
    pub voice_wait_timeout: Option<Duration>,
    pub listener: Vec3,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            buffer_slots: DEFAULT_BUFFER_SLOTS,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
            initial_buffer_bytes: DEFAULT_INITIAL_BUFFER_BYTES,
            reference_distance: DEFAULT_REFERENCE_DISTANCE,
            rolloff: DEFAULT_ROLLOFF,
            voice_wait_timeout: Some(Duration::from_secs(DEFAULT_VOICE_WAIT_SECS)),
            listener: Vec3::ORIGIN,
        }
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub server: SocketAddr,
    pub device: Option<String>,
    pub sample_rate: Option<u32>,
    pub tick_interval: Duration,
    pub request_chunks: bool,
    pub engine: EngineConfig,
}

impl ClientSettings {
    /// Merge file config with CLI overrides (CLI wins) and validate.
    pub fn resolve(cfg: &ClientConfig, args: &Args) -> Result<Self> {
        let server_raw = args
            .server
            .clone()
            .or_else(|| cfg.server.clone())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());
        let server: SocketAddr = server_raw
            .parse()
            .with_context(|| format!("parse server address {server_raw}"))?;

        let tick_rate_hz = cfg.tick_rate_hz.unwrap_or(DEFAULT_TICK_RATE_HZ);
        if tick_rate_hz == 0 || tick_rate_hz > 1000 {
            return Err(anyhow!("tick_rate_hz out of range: {tick_rate_hz}"));
        }

        let mut engine = EngineConfig::default();
        if let Some(e) = cfg.engine.as_ref() {
            engine.pool_capacity = e.pool_capacity.unwrap_or(engine.pool_capacity);
            engine.buffer_slots = e.buffer_slots.unwrap_or(engine.buffer_slots);
            engine.frames_per_buffer = e.frames_per_buffer.unwrap_or(engine.frames_per_buffer);
            engine.initial_buffer_bytes =
                e.initial_buffer_bytes.unwrap_or(engine.initial_buffer_bytes);
            engine.reference_distance = e.reference_distance.unwrap_or(engine.reference_distance);
            engine.rolloff = e.rolloff.unwrap_or(engine.rolloff);
            engine.voice_wait_timeout = match e.voice_wait_timeout_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => engine.voice_wait_timeout,
            };
        }
        if let Some([x, y, z]) = cfg.listener {
            engine.listener = Vec3::new(x, y, z);
        }
        if engine.pool_capacity == 0 {
            return Err(anyhow!("pool_capacity must be at least 1"));
        }
        if engine.buffer_slots == 0 || engine.frames_per_buffer == 0 {
            return Err(anyhow!("buffer_slots and frames_per_buffer must be at least 1"));
        }

        Ok(Self {
            server,
            device: args.device.clone().or_else(|| cfg.device.clone()),
            sample_rate: args.sample_rate.or(cfg.sample_rate),
            tick_interval: Duration::from_micros(1_000_000 / u64::from(tick_rate_hz)),
            request_chunks: args.request_chunks || cfg.request_chunks.unwrap_or(false),
            engine,
        })
    }
}
