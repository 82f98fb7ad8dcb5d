//! Operator console: one command per stdin line, parsed with clap.

use std::io::BufRead;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use audio_stream_proto::{EntityId, Vec3};
use clap::{Parser, Subcommand};
use crossbeam_channel::Sender;

use crate::net::ServerEvent;

#[derive(Parser, Debug)]
#[command(name = "console", no_binary_name = true, disable_help_flag = true)]
struct ConsoleLine {
    #[command(subcommand)]
    cmd: ConsoleCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// Stream a file from the sounds directory.
    Play {
        /// File name relative to the sounds directory.
        file: String,
        /// Static emitter position `x,y,z`.
        #[arg(long, allow_hyphen_values = true, conflicts_with = "entity")]
        at: Option<Vec3>,
        /// Follow this entity instead of a fixed point.
        #[arg(long)]
        entity: Option<EntityId>,
        #[arg(long)]
        volume: Option<f32>,
        #[arg(long)]
        pitch: Option<f32>,
        /// Maximum audible distance.
        #[arg(long)]
        range: Option<f32>,
        /// Client numbers to stream to (default: every connected client).
        #[arg(long, num_args = 1..)]
        to: Vec<u64>,
    },
    /// Stop every stream on the given clients (default: all).
    Stopall {
        #[arg(long, num_args = 1..)]
        to: Vec<u64>,
    },
    /// Move (or spawn) a tracked entity.
    #[command(allow_negative_numbers = true)]
    Entity { id: EntityId, x: f64, y: f64, z: f64 },
    /// Forget a tracked entity.
    Despawn { id: EntityId },
    /// List connected clients.
    Clients,
    /// List active sessions.
    Sessions,
    Quit,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, clap::Error> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Ok(None);
    }
    ConsoleLine::try_parse_from(words).map(|l| Some(l.cmd))
}

/// Forward stdin commands to the tick thread until stdin closes.
pub fn spawn_stdin(events: Sender<ServerEvent>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        tracing::warn!("console read failed: {e}");
                        return;
                    }
                };
                match parse_line(&line) {
                    Ok(Some(cmd)) => {
                        if events.send(ServerEvent::Console(cmd)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{e}"),
                }
            }
        })
        .context("spawn console thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_point_and_targets() {
        let cmd = parse_line("play ambience/wind.ogg --at -1,64.5,3 --volume 0.5 --to 1 3")
            .unwrap()
            .unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Play {
                file: "ambience/wind.ogg".into(),
                at: Some(Vec3::new(-1.0, 64.5, 3.0)),
                entity: None,
                volume: Some(0.5),
                pitch: None,
                range: None,
                to: vec![1, 3],
            }
        );
    }

    #[test]
    fn play_rejects_point_and_entity_together() {
        let line = "play a.ogg --at 1,2,3 --entity 6f9619ff-8b86-d011-b42d-00cf4fc964ff";
        assert!(parse_line(line).is_err());
    }

    #[test]
    fn parses_entity_with_negative_coordinates() {
        let cmd = parse_line("entity 6f9619ff-8b86-d011-b42d-00cf4fc964ff -10 0 2.5")
            .unwrap()
            .unwrap();
        match cmd {
            ConsoleCommand::Entity { x, y, z, .. } => assert_eq!((x, y, z), (-10.0, 0.0, 2.5)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blank_and_unknown_lines() {
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("dance").is_err());
        assert_eq!(
            parse_line("stopall").unwrap(),
            Some(ConsoleCommand::Stopall { to: vec![] })
        );
    }
}
