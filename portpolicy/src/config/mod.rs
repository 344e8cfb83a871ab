//! Policy documents: schema, loading and validation

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::{CommonConfig, Config, PeerRuleConfig, PortRuleConfig, RuleConfig, SecretConfig};
pub use validator::ConfigValidator;
