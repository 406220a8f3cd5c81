pub mod clock;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod grid;
pub mod match_runner;
pub mod matchmaking;
pub mod reconciliation;
pub mod rng;
pub mod server_protocol;
pub mod server_utils;
pub mod types;
pub mod validator;
pub mod visibility;
pub mod world;
