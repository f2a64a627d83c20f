//! Application configuration types.
//!
//! The top-level [`Config`] is deserialized from TOML. Every section defaults
//! sensibly so an empty file (or no file at all) is valid. Secrets are never
//! stored in the file: the config only names the environment variables they
//! are read from, see [`Credentials`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::job::{AssetSource, AssetSpec};

/// Locations searched when no explicit config path is given.
const DEFAULT_CONFIG_PATHS: &[&str] = &["./stagerun.toml", "~/.config/stagerun/config.toml"];

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub store: StoreConfig,
    pub assets: AssetsConfig,
    pub session: SessionConfig,
    pub tools: ToolsConfig,
    pub recipes: RecipesConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| Error::Configuration(format!("config parse error: {e}")))
    }

    /// Load configuration from an explicit path. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Load from `custom_path`, else the first default location that exists,
    /// else built-in defaults.
    pub fn load_or_default(custom_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = custom_path {
            return Self::load(path);
        }

        for candidate in DEFAULT_CONFIG_PATHS {
            let expanded = shellexpand::tilde(candidate);
            let path = Path::new(expanded.as_ref());
            if path.exists() {
                tracing::debug!("Using config file {}", path.display());
                return Self::load(path);
            }
        }

        tracing::debug!("No config file found; using defaults");
        Ok(Self::default())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.remote.backend == BackendKind::Http && self.remote.endpoint.is_none() {
            warnings.push("remote.backend is \"http\" but remote.endpoint is not set".into());
        }
        if self.store.kind == StoreKind::Http && self.store.endpoint.is_none() {
            warnings.push("store.kind is \"http\" but store.endpoint is not set".into());
        }
        if self.remote.timeout_secs == 0 {
            warnings.push("remote.timeout_secs is 0; every job will time out".into());
        }
        if self.assets.max_retries == 0 {
            warnings.push("assets.max_retries is 0; assets will never be fetched".into());
        }
        for (i, model) in self.assets.models.iter().enumerate() {
            if model.name.is_empty() {
                warnings.push(format!("assets.models[{i}].name is empty"));
            }
            if model.source.parse::<AssetSource>().is_err() {
                warnings.push(format!(
                    "assets.models[{i}].source '{}' is not a hub:// or http(s):// locator",
                    model.source
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Run jobs in-process in a temporary directory.
    #[default]
    Local,
    /// Submit jobs to a remote HTTP compute service.
    Http,
}

/// Remote compute backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub backend: BackendKind,
    pub endpoint: Option<String>,
    /// Environment variable holding the backend API key.
    pub api_key_env: String,
    /// Container image jobs run in.
    pub image: Option<String>,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Backend-side secrets exposed to every job.
    pub secrets: Vec<String>,
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            endpoint: None,
            api_key_env: "STAGERUN_API_KEY".into(),
            image: None,
            timeout_secs: 15 * 60,
            poll_interval_ms: 2000,
            secrets: vec!["huggingface-secret".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// A directory (typically a mounted shared volume).
    #[default]
    Local,
    /// An HTTP file service.
    Http,
}

/// Durable shared store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub root: PathBuf,
    pub endpoint: Option<String>,
    /// Environment variable holding the store token, if the store needs one.
    pub token_env: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Local,
            root: PathBuf::from(".stagerun/store"),
            endpoint: None,
            token_env: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// A model declared for pre-provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

impl ModelEntry {
    /// Asset spec for this model below `cache_dir`. Registry snapshots land
    /// in `<cache_dir>/<owner>/<repo>`, plain files in `<cache_dir>/<name>`.
    pub fn to_spec(&self, cache_dir: &Path) -> AssetSpec {
        let destination = match self.source.parse::<AssetSource>() {
            Ok(AssetSource::Hub { repo, .. }) => cache_dir.join(repo),
            _ => cache_dir.join(&self.name),
        };
        let spec = AssetSpec::new(&self.name, &self.source, destination);
        match self.sha256 {
            Some(ref sum) => spec.with_sha256(sum),
            None => spec,
        }
    }
}

/// Asset provisioning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub cache_dir: PathBuf,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub backoff: BackoffKind,
    pub registry_endpoint: String,
    /// Environment variable holding the registry token (optional).
    pub token_env: String,
    pub request_timeout_secs: u64,
    pub models: Vec<ModelEntry>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("/models"),
            max_retries: 5,
            retry_delay_secs: 15,
            backoff: BackoffKind::Fixed,
            registry_endpoint: "https://huggingface.co".into(),
            token_env: "HF_TOKEN".into(),
            request_timeout_secs: 100,
            models: vec![ModelEntry {
                name: "hubert".into(),
                source: "hub://facebook/hubert-large-ls960-ft".into(),
                sha256: None,
            }],
        }
    }
}

impl AssetsConfig {
    /// Specs for every configured model.
    pub fn model_specs(&self) -> Vec<AssetSpec> {
        self.models.iter().map(|m| m.to_spec(&self.cache_dir)).collect()
    }
}

/// Where the backend session is persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".stagerun/session.json"),
        }
    }
}

/// External tool names used by job recipes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub git: String,
    pub python: String,
    pub pip: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git: "git".into(),
            python: "python".into(),
            pip: "pip".into(),
        }
    }
}

/// Parameters of the built-in job recipes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipesConfig {
    pub portrait: PortraitRecipeConfig,
    pub subtitle: SubtitleRecipeConfig,
}

/// Talking-portrait rendering job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortraitRecipeConfig {
    /// Renderer source repository, cloned into the job workdir.
    pub repository: String,
    pub branch: Option<String>,
    /// Locator of the face-model (BFM) bundle.
    pub bfm_source: Option<String>,
    /// Locator of the pretrained checkpoint bundle.
    pub checkpoints_source: Option<String>,
    /// Falls back to `remote.timeout_secs`.
    pub timeout_secs: Option<u64>,
}

impl Default for PortraitRecipeConfig {
    fn default() -> Self {
        Self {
            repository: "https://github.com/yerfor/Real3DPortrait.git".into(),
            branch: None,
            bfm_source: None,
            checkpoints_source: None,
            timeout_secs: None,
        }
    }
}

/// Word-level subtitle compositing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleRecipeConfig {
    /// Subtitler script inside the job image.
    pub script: String,
    /// Falls back to `remote.timeout_secs`.
    pub timeout_secs: Option<u64>,
}

impl Default for SubtitleRecipeConfig {
    fn default() -> Self {
        Self {
            script: "/opt/stagerun/subtitle_words.py".into(),
            timeout_secs: Some(30 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Secrets resolved from the environment at startup.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub store_token: Option<String>,
    pub registry_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("store_token", &self.store_token.as_ref().map(|_| "<set>"))
            .field("registry_token", &self.registry_token.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials from the process environment.
    pub fn from_env(config: &Config) -> Result<Self> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// Resolve credentials with a custom lookup.
    ///
    /// The API key is required for the HTTP backend and the store token is
    /// required when `store.token_env` is set. A missing registry token only
    /// logs a warning.
    pub fn resolve(config: &Config, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = get(&config.remote.api_key_env);
        if config.remote.backend == BackendKind::Http && api_key.is_none() {
            return Err(Error::Configuration(format!(
                "{} is not set (required by the http backend)",
                config.remote.api_key_env
            )));
        }

        let store_token = match &config.store.token_env {
            Some(var) => Some(get(var).ok_or_else(|| {
                Error::Configuration(format!("{var} is not set (required by store.token_env)"))
            })?),
            None => None,
        };

        let registry_token = get(&config.assets.token_env);
        if registry_token.is_none() {
            tracing::warn!(
                "{} not set; registry downloads may be rate-limited",
                config.assets.token_env
            );
        }

        Ok(Self {
            api_key,
            store_token,
            registry_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.remote.backend, BackendKind::Local);
        assert_eq!(config.assets.max_retries, 5);
        assert_eq!(config.assets.retry_delay_secs, 15);
        assert_eq!(config.remote.timeout(), Duration::from_secs(900));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn parses_sections() {
        let config = Config::from_toml(
            r#"
            [remote]
            backend = "http"
            endpoint = "https://compute.example.com"
            timeout_secs = 1800

            [assets]
            backoff = "exponential"
            max_retries = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.remote.backend, BackendKind::Http);
        assert_eq!(config.remote.timeout_secs, 1800);
        assert_eq!(config.assets.backoff, BackoffKind::Exponential);
        assert_eq!(config.assets.max_retries, 3);
        assert_eq!(config.assets.token_env, "HF_TOKEN");
    }

    #[test]
    fn model_specs_land_in_cache_dir() {
        let config = AssetsConfig::default();
        let specs = config.model_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(
            specs[0].destination,
            PathBuf::from("/models/facebook/hubert-large-ls960-ft")
        );

        let file = ModelEntry {
            name: "bfm".into(),
            source: "https://example.com/BFM.zip".into(),
            sha256: Some("ab".repeat(32)),
        };
        let spec = file.to_spec(Path::new("/cache"));
        assert_eq!(spec.destination, PathBuf::from("/cache/bfm"));
        assert!(spec.sha256.is_some());
    }

    #[test]
    fn recipe_defaults() {
        let config = Config::from_toml("[recipes.portrait]\nbfm_source = \"hub://org/bfm\"").unwrap();
        assert_eq!(config.recipes.portrait.bfm_source.as_deref(), Some("hub://org/bfm"));
        assert!(config.recipes.portrait.checkpoints_source.is_none());
        assert_eq!(config.recipes.portrait.timeout_secs, None);
        assert_eq!(config.recipes.subtitle.timeout_secs, Some(1800));
    }

    #[test]
    fn invalid_toml_is_configuration_error() {
        let err = Config::from_toml("remote = 3").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load_or_default(Some(&dir.path().join("nope.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn validate_flags_http_without_endpoint() {
        let mut config = Config::default();
        config.remote.backend = BackendKind::Http;
        config.assets.models[0].source = "ftp://nowhere".into();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2, "got: {warnings:?}");
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn http_backend_requires_api_key() {
        let mut config = Config::default();
        config.remote.backend = BackendKind::Http;
        let err = Credentials::resolve(&config, lookup(&[])).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("STAGERUN_API_KEY")));

        let creds = Credentials::resolve(&config, lookup(&[("STAGERUN_API_KEY", "k")])).unwrap();
        assert_eq!(creds.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut config = Config::default();
        config.remote.backend = BackendKind::Http;
        assert!(Credentials::resolve(&config, lookup(&[("STAGERUN_API_KEY", "  ")])).is_err());
    }

    #[test]
    fn registry_token_is_optional() {
        let creds = Credentials::resolve(&Config::default(), lookup(&[])).unwrap();
        assert!(creds.registry_token.is_none());
    }

    #[test]
    fn store_token_required_when_named() {
        let mut config = Config::default();
        config.store.token_env = Some("STORE_TOKEN".into());
        assert!(Credentials::resolve(&config, lookup(&[])).is_err());
        let creds = Credentials::resolve(&config, lookup(&[("STORE_TOKEN", "t")])).unwrap();
        assert_eq!(creds.store_token.as_deref(), Some("t"));
    }

    #[test]
    #[serial_test::serial]
    fn from_env_reads_process_environment() {
        std::env::set_var("STAGERUN_TEST_KEY", "from-env");
        let mut config = Config::default();
        config.remote.backend = BackendKind::Http;
        config.remote.api_key_env = "STAGERUN_TEST_KEY".into();
        let creds = Credentials::from_env(&config).unwrap();
        std::env::remove_var("STAGERUN_TEST_KEY");
        assert_eq!(creds.api_key.as_deref(), Some("from-env"));
    }
}
