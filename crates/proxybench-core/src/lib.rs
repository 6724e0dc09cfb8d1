pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod results;

pub use error::{ProxyBenchError, TrialError, TrialFailure};
