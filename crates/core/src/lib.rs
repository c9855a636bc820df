pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod normalizer;
pub mod prompt;
pub mod provider;
pub mod proxy;
pub mod question;
pub mod rate_limit;
pub mod registry;
pub mod store;
