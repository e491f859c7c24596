//! evcon - evdev input for a user-space console
//!
//! - `eloop`: single-threaded reactor (fds, timers)
//! - `input`: device discovery, keyboard and pointer event streams
//! - `font`: FreeType glyph rasterizer
//! - `video`: display backend registry
//! - `config`: `[input]` configuration section

pub mod config;
pub mod eloop;
pub mod error;
pub mod font;
pub mod input;
pub mod video;

pub use error::InputError;
