// Core AgentRelay functionality without UI dependencies

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod run;
pub mod runtime;
pub mod session;
pub mod utils;

pub use context::AppContext;
pub use error::{Error, Result};
