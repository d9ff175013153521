pub mod config;
pub mod db;
pub mod error;
pub mod feedback;
pub mod generator;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod ranker;
pub mod recorder;
pub mod rolling_window;
pub mod scope;
pub mod signal;
pub mod validator;
