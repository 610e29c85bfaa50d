use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Remote,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
    pub backend: Backend,
    pub url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_fallback")]
    pub fallback: bool,
    pub mirror_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rewards {
    #[serde(default = "default_initial_grant")]
    pub initial_grant: u64,
    #[serde(default = "default_referral_reward")]
    pub referral_reward: u64,
    /// When true, redemption rejects an address found in *any* user's
    /// referral list; when false only the referrer's own list is checked.
    #[serde(default = "default_global_check")]
    pub global_referral_check: bool,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_fallback() -> bool {
    true
}

fn default_initial_grant() -> u64 {
    2000
}

fn default_referral_reward() -> u64 {
    200
}

fn default_global_check() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub storage: Storage,
    pub rewards: Rewards,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .build()?;

        config.try_deserialize()
    }
}
