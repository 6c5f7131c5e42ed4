//! Gateway configuration: schema, file discovery, `${VAR}` substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        config_dir, data_dir, discover_and_load, find_or_default_config_path, load_config,
        set_config_dir,
    },
    schema::{
        BridgeConfig, ConnectionConfig, MessagingConfig, RelayConfig, RetryDelays, ServerConfig,
        StoreConfig,
    },
};
