pub mod clock;
pub mod config;
pub mod engine;
pub mod guard;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod preferences;
pub mod query;
pub mod reaper;
pub mod service;
pub mod store;
pub mod wal;
