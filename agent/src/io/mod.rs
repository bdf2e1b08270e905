//! Side-effecting adapters: configuration, gateways, and prompt rendering.

pub mod config;
pub mod content;
pub mod oracle;
pub mod prompt;
