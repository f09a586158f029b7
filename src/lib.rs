//! Causette is a terminal client for agent services that stream their
//! replies as sections and pause for the user's permission before using
//! sensitive tools.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the streaming pipeline (line buffering, frame parsing,
//!   section assembly and the per-session stream state machine), the
//!   conversation store, the error taxonomy, and configuration.
//! - [`api`] defines the wire payloads and the reqwest-backed client that
//!   implements the transport seam used by [`core::stream`].
//! - [`auth`] keeps the bearer token in the system keyring.
//! - [`commands`] parses the slash commands of the chat loop.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod auth;
pub mod cli;
pub mod commands;
pub mod core;
pub mod utils;
