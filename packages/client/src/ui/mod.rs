//! Terminal front end: prompt, formatting and the reconnecting runner.

mod domain;
pub mod error;
mod formatter;
mod prompt;
mod runner;
mod terminal;

pub use error::ClientError;
pub use runner::{ClientOptions, run_client};
