//! # Quickterm Core Library
//!
//! The engine of a serial terminal with profile-driven command buttons:
//! - A serial link with a background reader loop and ordered events
//! - Line-ending framing (none, LF, CR, CRLF)
//! - Command dispatch, including Ctrl+C (ETX), with last-result tracking
//! - Command profiles (sections of labeled commands) persisted as JSON
//!
//! ## Example
//!
//! ```rust,no_run
//! use quickterm_core::{CommandDispatcher, LineEnding, LinkEvent, LinkSettings, SerialLink};
//! use std::sync::Arc;
//!
//! let link = Arc::new(SerialLink::system(LinkSettings::default()));
//! let events = link.events();
//! let dispatcher = CommandDispatcher::new(Arc::clone(&link));
//!
//! link.connect("/dev/ttyUSB0", 115_200);
//! while let Ok(event) = events.recv() {
//!     dispatcher.ingest(&event);
//!     match event {
//!         LinkEvent::Connected => {
//!             let _ = dispatcher.send("AT", LineEnding::CrLf);
//!         }
//!         LinkEvent::DataReceived(data) => println!("{}", String::from_utf8_lossy(&data)),
//!         LinkEvent::Error(e) => eprintln!("{e}"),
//!         LinkEvent::Disconnected => break,
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::dispatch::{CommandDispatcher, DispatchError, DispatchMarker, Transcript};
pub use crate::core::framing::{frame, LineEnding};
pub use crate::core::link::{
    LinkError, LinkErrorKind, LinkEvent, LinkSettings, LinkState, PortInfo, SerialBackend,
    SerialLink,
};
pub use crate::core::profile::{
    sanitize_key, CatalogError, CommandItem, Profile, ProfileStore, StoreError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
