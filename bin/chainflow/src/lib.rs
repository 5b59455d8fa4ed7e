//! Chainflow process: configuration, persistence, workflow mutations and
//! the wiring that runs the listener, cron scheduler and job workers.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod service;
pub mod source;
