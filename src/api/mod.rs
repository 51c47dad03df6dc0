//! HTTP entry point. One POST route runs a pipeline task; payloads arrive as
//! JSON bodies or query strings.

pub mod handlers;
pub mod server;

pub use server::ApiServer;
