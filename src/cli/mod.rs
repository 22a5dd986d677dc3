//! Command-line output.

mod output;

pub use output::*;
