//! Bertrand · narrative chat game core.
//!
//! Three independent state machines (turn/outcome, level progression, gesture challenge)
//! plus the orchestration and HTTP/WebSocket surface that drive them.

pub mod challenge;
pub mod config;
pub mod decision;
pub mod domain;
pub mod error;
pub mod game;
pub mod openai;
pub mod progression;
pub mod protocol;
pub mod routes;
pub mod seeds;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod turn;
pub mod util;
