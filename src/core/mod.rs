//! Core types shared by every layer.

mod config;
mod constants;
mod error;
mod traits;
mod types;

pub use config::*;
pub use constants::*;
pub use error::*;
pub use traits::*;
pub use types::*;
