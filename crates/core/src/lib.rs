pub mod config;
pub mod error;
pub mod tenant;

pub use config::Config;
pub use error::*;
pub use tenant::TenantContext;
