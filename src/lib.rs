pub mod auth;
pub mod bus;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod push;
pub mod server;
pub mod shutdown;
pub mod store;
