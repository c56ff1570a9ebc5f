pub mod authority;
pub mod config;
pub mod db;
pub mod delegation;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod state;
pub mod sweep;
pub mod tier;
pub mod workflow;
