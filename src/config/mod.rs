pub mod schema;

#[allow(unused_imports)]
pub use schema::{resolve_config_dir, AgentClientConfig, Config, GatewayConfig, CONFIG_DIR_ENV};
