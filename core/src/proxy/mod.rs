//! Proxy module - transparent reverse proxy for an OpenAI-compatible upstream

pub mod classify;
pub mod cors;
pub mod forward;
pub mod handlers;
pub mod headers;
pub mod relay;
pub mod server;
pub mod upstream;


pub use classify::ForwardDecision;
pub use forward::{forward, Deadline, InboundRequest};
pub use relay::OutboundResponse;
pub use server::{router, AppState, ProxyServer};
pub use upstream::UpstreamClient;
