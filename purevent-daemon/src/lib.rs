//! Purevent gateway daemon: EnOcean serial gateway -> decoded readings ->
//! device registry, history and an HTTP API.

pub mod activity;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod esp3;
pub mod health;
pub mod history;
pub mod http;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod store;
pub mod telegram;
pub mod transport;

pub use daemon::Daemon;
