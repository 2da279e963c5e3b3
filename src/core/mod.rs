//! Core module containing the serial engine of Quickterm
//!
//! This module provides:
//! - Line-ending framing for outgoing commands
//! - The serial link worker (reader loop, writes, lifecycle events)
//! - Command dispatch with the last-command boundary marker
//! - Command profiles and their on-disk store

pub mod dispatch;
pub mod framing;
pub mod link;
pub mod profile;
