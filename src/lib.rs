// Encrypted token storage
pub mod credentials;

// Scope strings and coverage checks
pub mod scope;

// Configuration loading
pub mod config;

// Caller identity
pub mod auth;

// OAuth connect flow, refresh and the credential manager
pub mod oauth;

// Calendar and Drive API clients
pub mod google;

// HTTP API
pub mod api;
