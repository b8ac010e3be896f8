pub mod config;
pub mod error;

pub use config::{ControlConfig, TaskctlConfig, load_dotenv};
pub use error::ConfigError;
