pub mod client;

pub use client::{CallShape, OutboundTarget, UpstreamClient};
