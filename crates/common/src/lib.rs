//! Types shared by the AI gateway crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
