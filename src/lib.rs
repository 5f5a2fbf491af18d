// Error taxonomy
pub mod error;

// Encrypted API key storage
pub mod credentials;

// File and environment configuration
pub mod config;

// HTTP adapter
pub mod api;
