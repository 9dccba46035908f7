//! chirp-core — shared types for the CHIRP discovery protocol.
//! Wire format, hash identity, and configuration. All other CHIRP
//! crates depend on this one.

pub mod config;
pub mod hash;
pub mod wire;

pub use hash::Md5Hash;
pub use wire::{DecodeError, Message, MessageType, ServiceIdentifier, CHIRP_PORT};
