//! REST binding for the gateway: parameter encoding plus the HTTP client.

pub mod client;
pub mod codec;
