//! Reverie Core - Types, events, and error handling shared by the thinking loop

pub mod error;
pub mod events;
pub mod memory;
pub mod types;

pub use error::{Error, Result};
pub use events::*;
pub use memory::*;
pub use types::*;
