// Library exports for agora
// The binary and the integration tests both build on these modules

pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod keys;
pub mod model;
pub mod padding;
pub mod state;
pub mod sweeper;
