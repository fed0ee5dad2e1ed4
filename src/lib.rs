//! Vantage - Dokku deployment orchestration over SSH

pub mod api;
pub mod config;
pub mod db;
pub mod deploy;
pub mod domain;
pub mod events;
pub mod health;
pub mod hosts;
pub mod ssh;
pub mod sync;
