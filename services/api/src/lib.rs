//! Livebridge API Library Crate
//!
//! Configuration, HTTP handlers, routing, and the WebSocket relay. The `api`
//! binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
