pub mod config;
pub mod error;
pub mod types;

pub use config::DapurConfig;
pub use error::{CoreError, Result};
pub use types::*;
