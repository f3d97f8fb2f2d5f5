//! Core types shared by every xlab crate.
//!
//! - [`error`]: the library error type
//! - [`interface`]: the connection to one instrument through one backend
//! - [`scpi`]: SCPI parameter rendering and reply parsing
//! - [`serial`]: async serial port plumbing for serial-attached instruments
//! - [`capabilities`]: what an instrument can do, as async traits
//! - [`driver`]: the factory API drivers register with the registry
//! - [`mock`]: a scripted interface for tests and dry runs

pub mod capabilities;
pub mod driver;
pub mod error;
pub mod interface;
pub mod mock;
pub mod scpi;
pub mod serial;

pub use error::{Result, XlabError};
pub use interface::{split_interface_id, Interface, StreamInterface};
