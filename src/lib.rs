pub mod access;
pub mod advisory;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod snapshot;
pub mod sweeper;
pub mod wire;
