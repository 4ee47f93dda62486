//! Serial protocol driver for an EMFI fault-injection pulse generator.
//!
//! The protocol multiplexes three typed option tables into one frame via
//! per-category bitmasks, on top of byte-stuffed framing with a CRC-16
//! trailer. This crate implements the whole stack: the frame codec, the
//! option model, the request/response engine, the single-byte command
//! layer, the multi-frame pattern-wave continuation protocol, and the
//! stop-and-wait firmware download engine.
//!
//! Strictly one request/response exchange is in flight at a time; the
//! device never speaks unprompted outside of download mode.

mod client;
pub use client::*;

pub mod download;
pub mod protocol;
pub mod threaded;

mod error;
pub use error::{Error, Result};
