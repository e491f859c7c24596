//! Error types for the input subsystem

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the input subsystem
///
/// Only manager construction reports errors to the caller. Device
/// operations are best-effort: failures are logged and the affected
/// device is dropped.
#[derive(Debug, Error)]
pub enum InputError {
    /// Missing or malformed construction parameters
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// open/ioctl/read failure on an evdev node
    #[error("I/O error on {}: {source}", node.display())]
    DeviceIo {
        node: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The keymap description could not be built
    #[error("keymap error: {0}")]
    Keymap(String),

    /// The event loop refused a registration
    #[error("event loop error: {0}")]
    EventLoop(String),
}

impl InputError {
    pub(crate) fn device_io(node: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::DeviceIo {
            node: node.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, InputError>;
