use anyhow::Result;
use clap::ValueEnum;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Which API deployment the console talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Production,
    Development,
}

impl Default for Environment {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Environment::Development
        } else {
            Environment::Production
        }
    }
}

/// Console configuration, usually `studyboard.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub production_url: String,
    #[serde(default = "default_development_url")]
    pub development_url: String,
    /// Unset means reqwest's default (no timeout)
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            production_url: String::new(),
            development_url: default_development_url(),
            request_timeout_secs: None,
        }
    }
}

fn default_development_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

/// Identity provider the access token is obtained from
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub scope: String,
}

impl ConsoleConfig {
    /// Load the configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e)
        })?;

        let config: ConsoleConfig = serde_yaml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse config YAML {}: {}", path.display(), e)
        })?;

        Ok(config)
    }

    /// Reads `path` when given, else `./studyboard.yaml` if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let default_path = Path::new("studyboard.yaml");
                if default_path.exists() {
                    Self::load_from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn base_url(&self, env: Environment) -> Result<&str> {
        let url = match env {
            Environment::Production => &self.api.production_url,
            Environment::Development => &self.api.development_url,
        };
        if url.trim().is_empty() {
            anyhow::bail!("No API URL configured for the {:?} environment", env);
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.api.request_timeout_secs.map(Duration::from_secs)
    }

    /// Hint printed when the API asks for a (new) login
    pub fn login_hint(&self) -> String {
        let identity = &self.identity;
        if identity.domain.is_empty() {
            return "Set STUDYBOARD_TOKEN or pass --token with a valid access token".to_string();
        }
        let mut hint = format!(
            "Obtain an access token from https://{} (client {}",
            identity.domain, identity.client_id
        );
        if !identity.audience.is_empty() {
            hint.push_str(&format!(", audience {}", identity.audience));
        }
        if !identity.scope.is_empty() {
            hint.push_str(&format!(", scope \"{}\"", identity.scope));
        }
        hint.push_str(") and set STUDYBOARD_TOKEN");
        hint
    }
}
