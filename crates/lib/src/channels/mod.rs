//! Chat channel side of the bridge.
//!
//! Inbound events from every bot connection are tagged with the receiving bot and fanned
//! into one channel for the router; outbound sends go through the pool by bot identity.

mod inbound;
mod pool;
mod rest;

pub use inbound::{Attachment, BotEvent, InboundEvent, Mention};
pub use pool::{BotConnectionPool, BotIdentity, BotOutbound, PoolError};
pub use rest::{ApiError, ChatApi, RestClient, Session};
