use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::audio::player::PlayerSettings;

/// Upper bound for the per-guild gain, matching the `volume` command range (0-200%).
pub const MAX_VOLUME: f32 = 2.0;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Health endpoint
    pub port: u16,

    // Resolver
    pub ytdlp_path: String,
    pub cookies_path: Option<PathBuf>,
    pub resolve_timeout_secs: u64,

    // Playback
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub idle_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let discord_token = std::env::var("DISCORD_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty())
            .context("DISCORD_TOKEN environment variable not set")?;

        let config = Self {
            discord_token,
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or_else(|_| "-".to_string()),

            port: std::env::var("PORT")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .context("PORT must be a valid port number")?,

            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            cookies_path: std::env::var("YT_COOKIES")
                .ok()
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            resolve_timeout_secs: std::env::var("RESOLVE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,

            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "1.0".to_string())
                .parse()?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
            idle_timeout_secs: std::env::var("IDLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Command prefix must not be empty or contain whitespace
    /// - Volume must be between 0.0 and 2.0
    /// - Queue size and resolve timeout must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.command_prefix.is_empty() || self.command_prefix.chars().any(char::is_whitespace) {
            anyhow::bail!("Command prefix must be a non-empty token, got: {:?}", self.command_prefix);
        }

        if !(0.0..=MAX_VOLUME).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and {}, got: {}",
                MAX_VOLUME,
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.resolve_timeout_secs == 0 {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        Ok(())
    }

    /// Settings handed to every guild worker of the playback manager.
    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            default_volume: self.default_volume,
            max_queue_size: self.max_queue_size,
            idle_timeout: self.idle_timeout(),
        }
    }

    /// `None` when auto-leave is disabled (`IDLE_TIMEOUT_SECS=0`).
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix {:?}\n  \
            Health: port {}\n  \
            Resolver: {} (cookies: {}, timeout {}s)\n  \
            Playback: {}% vol, {} max queue, idle leave {}",
            self.command_prefix,
            self.port,
            self.ytdlp_path,
            self.cookies_path
                .as_ref()
                .map_or("none".to_string(), |p| p.display().to_string()),
            self.resolve_timeout_secs,
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            self.idle_timeout()
                .map_or("disabled".to_string(), |d| format!("{}s", d.as_secs())),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no default token - must be provided)
            discord_token: String::new(),
            command_prefix: "-".to_string(),

            port: 10000,

            ytdlp_path: "yt-dlp".to_string(),
            cookies_path: None,
            resolve_timeout_secs: 30,

            default_volume: 1.0,
            max_queue_size: 500,
            idle_timeout_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_volume() {
        let config = Config {
            default_volume: 2.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_blank_prefix_and_empty_queue() {
        let blank_prefix = Config {
            command_prefix: " ".to_string(),
            ..Config::default()
        };
        assert!(blank_prefix.validate().is_err());

        let no_queue = Config {
            max_queue_size: 0,
            ..Config::default()
        };
        assert!(no_queue.validate().is_err());
    }

    #[test]
    fn zero_idle_timeout_disables_auto_leave() {
        let config = Config {
            idle_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(
            Config::default().idle_timeout(),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn summary_never_contains_the_token() {
        let config = Config {
            discord_token: "super-secret".to_string(),
            ..Config::default()
        };
        assert!(!config.summary().contains("super-secret"));
    }
}
