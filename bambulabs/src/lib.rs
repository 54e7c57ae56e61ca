//! Rust client for Bambu Lab printers reached through the Bambu cloud: the
//! shared broker session, report decoding, commands, account login and
//! file upload.

#![deny(missing_docs)]

pub mod cloud;
pub mod command;
mod error;
pub mod message;
pub mod pool;
pub mod sequence_id;
pub mod upload;

pub use error::{Error, Result};
