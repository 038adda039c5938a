//! Wire contract shared by the livebridge relay and its clients.
//!
//! Everything in this crate is transport-agnostic except [`client`], which
//! speaks to a running relay over `tokio-tungstenite`.

pub mod backend;
pub mod client;
pub mod codec;
pub mod event;
pub mod limiter;
pub mod retry;

/// Key carried by frames that hold raw realtime bytes once they are expressed as JSON.
pub const BINARY_DATA_KEY: &str = "binary_data";
