//! Realtime (websocket) transport to the chat server: wire frames and the reconnecting client.

pub mod client;
pub mod protocol;

pub use client::{
    backoff_delay, ConnectionClient, ConnectionError, ConnectionOptions, ConnectionState, Login,
};
