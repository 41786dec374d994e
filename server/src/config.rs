use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Ripple chat server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "ripple-server", version, about = "Ripple chat server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "RIPPLE_PORT", default_value = "4000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "RIPPLE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./ripple.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RIPPLE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys, attachments)
    #[arg(long, env = "RIPPLE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Maximum attachment size in megabytes
    #[arg(long, env = "RIPPLE_MAX_ATTACHMENT_MB", default_value = "10")]
    pub max_attachment_mb: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            bind_address: "0.0.0.0".to_string(),
            config: "./ripple.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            max_attachment_mb: 10,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RIPPLE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("RIPPLE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn max_attachment_bytes(&self) -> usize {
        self.max_attachment_mb as usize * 1024 * 1024
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Ripple Chat Server Configuration
# Place this file at ./ripple.toml or specify with --config <path>
# All settings can be overridden via environment variables (RIPPLE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4000)
# port = 4000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database, JWT signing key, and attachments
# data_dir = "./data"

# Maximum attachment size in megabytes (default: 10)
# max_attachment_mb = 10
"#
    .to_string()
}
