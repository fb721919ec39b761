//! Raw event log schema
//!
//! This module defines the input record layout and the reader that decodes
//! event logs from JSON arrays or NDJSON.

mod raw_event;
mod reader;

pub use raw_event::*;
pub use reader::*;
