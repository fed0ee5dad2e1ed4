//! Database module - SQLite with sqlx

mod attempts;
mod deployments;
mod health;
mod hosts;
mod pool;
mod resources;

pub use attempts::*;
pub use deployments::*;
pub use health::*;
pub use hosts::*;
pub use pool::*;
pub use resources::*;
