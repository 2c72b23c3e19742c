use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const DEFAULT_COMMAND_PREFIXES: [&str; 4] = [".", "!", "/", "#"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bot: BotConfig,
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub responder: Option<ResponderConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    /// Owner identifier; the only sender allowed to issue mutation commands.
    pub owner: String,
    /// Fixed destination every proof approval request is forwarded to.
    /// Defaults to the owner.
    pub admin_forward: Option<String>,
    pub command_prefixes: Option<Vec<String>>,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    pub data_dir: Option<String>,
    /// Base URL of the gateway sidecar that owns the chat socket; media
    /// bytes are fetched from `<base>/media/<ref>`.
    pub gateway_base_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReminderConfig {
    pub interval_hours: Option<u64>,
    /// Days ahead of the billing day on which reminders already fire.
    pub lead_days: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResponderConfig {
    pub enabled: Option<bool>,
    pub api_url: String,
    pub persona: Option<String>,
    pub deflection_phrases: Option<Vec<String>>,
}

impl BotConfig {
    pub fn admin_forward(&self) -> &str {
        self.admin_forward.as_deref().unwrap_or(&self.owner)
    }

    pub fn command_prefixes(&self) -> Vec<String> {
        self.command_prefixes.clone().unwrap_or_else(|| {
            DEFAULT_COMMAND_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect()
        })
    }
}

impl RuntimeConfig {
    pub fn data_dir(&self) -> String {
        self.data_dir.clone().unwrap_or_else(|| "./data".to_string())
    }

    pub fn gateway_base_url(&self) -> String {
        self.gateway_base_url
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:3780".to_string())
    }
}

impl ReminderConfig {
    pub fn interval_hours(&self) -> u64 {
        self.interval_hours.unwrap_or(24)
    }

    pub fn lead_days(&self) -> u32 {
        self.lead_days.unwrap_or(0)
    }
}

pub fn load_config(path: &PathBuf) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: Config = serde_yaml::from_str(&text).context("parse yaml")?;
    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    if !crate::ledger::is_phone_shaped(&cfg.bot.owner) {
        return Err(anyhow!(
            "bot.owner '{}' is not a phone-shaped identifier (+ and digits)",
            cfg.bot.owner
        ));
    }
    if let Some(fwd) = &cfg.bot.admin_forward {
        if !crate::ledger::is_phone_shaped(fwd) {
            return Err(anyhow!(
                "bot.admin_forward '{}' is not a phone-shaped identifier",
                fwd
            ));
        }
    }
    if cfg.bot.command_prefixes().iter().any(|p| p.is_empty()) {
        return Err(anyhow!("bot.command_prefixes contains an empty prefix"));
    }
    if cfg.reminders.interval_hours() == 0 {
        return Err(anyhow!("reminders.interval_hours must be > 0"));
    }
    if let Some(r) = &cfg.responder {
        if r.enabled.unwrap_or(true) && r.api_url.is_empty() {
            return Err(anyhow!("responder.api_url is empty but responder is enabled"));
        }
    }
    Ok(())
}

pub fn parse_config_arg(args: &[String]) -> Option<PathBuf> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            return Some(PathBuf::from(&args[i + 1]));
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        let yaml = r#"
bot:
  owner: "+5217771303481"
runtime:
  data_dir: ./data
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn defaults_apply() {
        let cfg = base_config();
        assert_eq!(cfg.bot.admin_forward(), "+5217771303481");
        assert_eq!(cfg.reminders.interval_hours(), 24);
        assert_eq!(cfg.reminders.lead_days(), 0);
        assert_eq!(cfg.bot.command_prefixes(), vec![".", "!", "/", "#"]);
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn rejects_bad_owner() {
        let mut cfg = base_config();
        cfg.bot.owner = "not-a-number".into();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn config_arg_parsing() {
        let args = vec!["--config".to_string(), "bot.yaml".to_string()];
        assert_eq!(parse_config_arg(&args), Some(PathBuf::from("bot.yaml")));
        assert_eq!(parse_config_arg(&["--config".to_string()]), None);
    }
}
