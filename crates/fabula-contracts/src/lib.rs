pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod providers;
pub mod validation;

pub use config::GatewayConfig;
pub use error::ProviderError;
