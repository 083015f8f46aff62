//! Model Context Protocol envelope types and the request dispatcher

pub mod rpc;
pub mod server;
