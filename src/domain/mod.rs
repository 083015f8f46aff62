//! Tool definitions and invocation
//!
//! Provides the database-inspection tools exposed over the MCP protocol

pub mod tools;
pub mod utils;
