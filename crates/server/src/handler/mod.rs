pub mod admin;
pub mod cache;
pub mod health;
pub mod search;
