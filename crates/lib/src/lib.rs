//! Chatbridge core library: realtime bot connections, message routing, and agent dispatch
//! used by the CLI.

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod init;
pub mod realtime;
pub mod routing;
pub mod service;
pub mod status;
