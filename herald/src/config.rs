//! TOML configuration for a campaign run
//!
//! ```toml
//! [[endpoints]]
//! kind = "smtp"
//! nickname = "bulk-1"
//! host = "mail.example.com"
//! username = "mailer@example.com"
//! password = "secret"
//! encryption = "starttls"
//! rate = { max_count = 120, period_secs = 60, burst = 10 }
//!
//! [dispatch]
//! batch_size = 25
//! concurrency = 10
//!
//! [campaign]
//! subjects = ["{Hello|Hi} {{first_name}}"]
//! from_names = ["The Team"]
//! to = "{{email}}"
//! plain_body = "Hi {{first_name}}, your ref is #{{[token]}}"
//! headers = ["X-Campaign: spring"]
//! ```

use std::path::Path;

use herald_common::Endpoint;
use herald_dispatch::DispatchConfig;
use herald_template::ContentTemplates;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was being read
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The file is not valid configuration
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Path that was being parsed
        path: String,
        /// Underlying parse error
        source: toml::de::Error,
    },
}

/// The authored campaign content
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignConfig {
    /// Subject templates, cycled per job
    #[serde(default)]
    pub subjects: Vec<String>,
    /// From-name templates, cycled per job
    #[serde(default)]
    pub from_names: Vec<String>,
    /// Recipient template, resolved against each row
    #[serde(default)]
    pub to: String,
    /// HTML body template
    #[serde(default)]
    pub html_body: Option<String>,
    /// Plain-text body template
    #[serde(default)]
    pub plain_body: Option<String>,
    /// Custom header lines, `Name: value-template`
    #[serde(default)]
    pub headers: Vec<String>,
}

impl CampaignConfig {
    /// Convert to the preparation-layer template set
    #[must_use]
    pub fn to_templates(&self) -> ContentTemplates {
        ContentTemplates {
            subjects: self.subjects.clone(),
            from_names: self.from_names.clone(),
            to: self.to.clone(),
            html_body: self.html_body.clone(),
            plain_body: self.plain_body.clone(),
            headers: ContentTemplates::parse_header_block(&self.headers.join("\n")),
        }
    }
}

/// Full configuration for one herald invocation
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The selected delivery endpoints
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Campaign content
    #[serde(default)]
    pub campaign: CampaignConfig,
}

/// Load configuration from a TOML file
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
