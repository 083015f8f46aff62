pub mod auth;
pub mod config;
pub mod database;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod mcp;
pub mod security;
pub mod transport;
