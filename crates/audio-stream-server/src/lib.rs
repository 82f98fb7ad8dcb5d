//! Sender side of the positional audio streaming engine.
//!
//! A play request opens a sandboxed asset and creates a [`session::StreamSession`]; every tick
//! the [`manager::SessionManager`] forwards a bounded number of chunks to the session's
//! recipients until the asset is exhausted or nobody is listening.

pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod library;
pub mod manager;
pub mod net;
pub mod recipient;
pub mod runtime;
pub mod session;
pub mod source;
