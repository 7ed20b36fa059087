//! Ball Match Server - authoritative multiplayer match server for a
//! physics platformer, plus the client-side prediction and smoothing
//! machinery that talks to it.
//!
//! - `game`: physics world, simulation engine, server match loop, match state machine
//! - `client`: tick pacing, local prediction, remote state smoothing
//! - `ws`/`http`: socket protocol, ticket admission, health endpoint

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod ids;
pub mod level;
pub mod util;
pub mod ws;
