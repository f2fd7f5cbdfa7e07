//! openai-relay core library
//! Transparent forwarding of an OpenAI-compatible API: configuration, errors, and the proxy server

pub mod config;
pub mod error;
pub mod proxy;

pub use error::ProxyError;
