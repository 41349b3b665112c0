//! Shared frame codec, SOCKS5 state machine, and relay engine used by
//! the gateway and relay binaries.

pub mod auth;
pub mod config;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod pipe;
pub mod relay;
pub mod socks5;

pub use error::{Error, Result};
