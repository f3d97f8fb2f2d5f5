//! Rohde & Schwarz signal generators.

pub mod sml01;

pub use sml01::{AmSource, Sml01, Sml01Factory};
