//! Configuration for Warden: filesystem layout and `config.toml` settings.

mod paths;
mod settings;

pub use paths::{
    ENV_AUDIT_PATH, ENV_LOG_PATH, ENV_PROTOCOL_PATH, ENV_ROOT, ENV_STATE_DIR, ENV_STATE_PATH,
    ENV_TARGET, SessionFiles, WardenPaths, baseline_path, snapshot_path,
};
pub use settings::{
    ConfigError, DEFAULT_GRACE_WINDOW_MS, ExecConfig, GatesConfig, WardenConfig, config_path,
    get_value, set_value,
};
