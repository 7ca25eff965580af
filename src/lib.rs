// Error taxonomy shared by all components
pub mod error;

// TOML tunables and environment secrets
pub mod config;

// Encrypted token vault and its persistence
pub mod credentials;

// Identity provider adapters
pub mod identity;

// OAuth providers, token endpoint and CSRF state
pub mod oauth;

// Outbound event queue
pub mod queue;

// Magic-link sign-in and session cookies
pub mod session;

// Signed webhook verification and relay
pub mod webhook;

// HTTP routes
pub mod api;

pub use error::{Error, Result};
