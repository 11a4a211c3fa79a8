//! Configuration
//!
//! Strongly-typed settings for the session controller, loaded with figment
//! from a TOML file plus environment overrides (prefix `RENDER_SESSION_`).
//! Every field has a default, so an empty file (or none at all) yields a
//! working configuration.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::service::{RenderMode, VmSize};
use crate::session::lease::LeaseExtensionPolicy;

/// Controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Property-poll interval while not fully connected.
    #[serde(default = "default_poll_interval_fast", with = "humantime_serde")]
    pub poll_interval_fast: Duration,
    /// Property-poll interval once the runtime is connected.
    #[serde(default = "default_poll_interval_slow", with = "humantime_serde")]
    pub poll_interval_slow: Duration,
    /// SDK pump cadence while any session exists.
    #[serde(default = "default_pump_interval", with = "humantime_serde")]
    pub pump_interval: Duration,
    /// How long a runtime connect attempt may stay in `Connecting` before it
    /// is abandoned (original clients used 10-20 s).
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// VM size requested for new sessions.
    #[serde(default = "default_vm_size")]
    pub default_vm_size: VmSize,
    /// Max lease requested for new sessions, in minutes.
    #[serde(default = "default_lease_minutes")]
    pub default_lease_minutes: u32,
    /// Rendering mode requested when connecting the runtime.
    #[serde(default)]
    pub render_mode: RenderMode,
    /// Uniform scale applied to the root entity of loaded models.
    #[serde(default = "default_model_scale")]
    pub model_scale: f32,
    /// Lease auto-extension defaults (persisted overrides win at runtime).
    #[serde(default)]
    pub auto_extension: LeaseExtensionPolicy,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_poll_interval_fast() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_interval_slow() -> Duration {
    Duration::from_secs(20)
}

fn default_pump_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_vm_size() -> VmSize {
    VmSize::Standard
}

fn default_lease_minutes() -> u32 {
    60
}

fn default_model_scale() -> f32 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_fast: default_poll_interval_fast(),
            poll_interval_slow: default_poll_interval_slow(),
            pump_interval: default_pump_interval(),
            connect_timeout: default_connect_timeout(),
            default_vm_size: default_vm_size(),
            default_lease_minutes: default_lease_minutes(),
            render_mode: RenderMode::default(),
            model_scale: default_model_scale(),
            auto_extension: LeaseExtensionPolicy::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load configuration from `render_session.toml` and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("render_session.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// Environment variables prefixed with `RENDER_SESSION_` override file
    /// values, e.g. `RENDER_SESSION_LOG_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RENDER_SESSION_"))
            .extract()
    }

    /// Validate settings after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.poll_interval_fast.is_zero() || self.poll_interval_slow.is_zero() {
            return Err("Poll intervals must be non-zero".to_string());
        }
        if self.poll_interval_fast > self.poll_interval_slow {
            return Err(format!(
                "poll_interval_fast ({:?}) must not exceed poll_interval_slow ({:?})",
                self.poll_interval_fast, self.poll_interval_slow
            ));
        }
        if self.pump_interval.is_zero() {
            return Err("pump_interval must be non-zero".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be non-zero".to_string());
        }
        if self.default_lease_minutes == 0 {
            return Err("default_lease_minutes must be positive".to_string());
        }
        if self.model_scale <= 0.0 {
            return Err(format!("Invalid model_scale {}", self.model_scale));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.poll_interval_fast, Duration::from_secs(10));
        assert_eq!(settings.pump_interval, Duration::from_millis(100));
        assert_eq!(settings.default_lease_minutes, 60);
        assert!(settings.auto_extension.enabled);
    }

    #[test]
    fn loads_from_toml() {
        let settings: Settings = Figment::new()
            .merge(Toml::string(
                r#"
                poll_interval_fast = "5s"
                connect_timeout = "20s"
                default_vm_size = "Premium"
                default_lease_minutes = 120

                [auto_extension]
                enabled = false
                extension_minutes = 30
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(settings.poll_interval_fast, Duration::from_secs(5));
        assert_eq!(settings.connect_timeout, Duration::from_secs(20));
        assert_eq!(settings.default_vm_size, VmSize::Premium);
        assert_eq!(settings.default_lease_minutes, 120);
        assert!(!settings.auto_extension.enabled);
        assert_eq!(settings.auto_extension.extension_minutes, 30);
        // Unspecified fields keep their defaults.
        assert_eq!(settings.poll_interval_slow, Duration::from_secs(20));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_log_level() {
        let settings = Settings {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_inverted_poll_intervals() {
        let settings = Settings {
            poll_interval_fast: Duration::from_secs(30),
            poll_interval_slow: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_zero_lease() {
        let settings = Settings {
            default_lease_minutes: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
