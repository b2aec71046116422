//! Persistent service configuration model, defaults, and loading.

use std::path::{Path, PathBuf};

use log::{info, warn};

const CONFIG_FILE_NAME: &str = "snapbook.toml";
const CONFIG_PATH_ENV: &str = "SNAPBOOK_CONFIG";

/// Root configuration persisted to `snapbook.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Listener and public URL settings.
    pub server: ServerConfig,
    #[serde(default)]
    /// Database and photo bucket locations.
    pub storage: StorageConfig,
    #[serde(default)]
    /// Photo upload limits and conversion quality.
    pub uploads: UploadsConfig,
    #[serde(default)]
    /// Song metadata lookups.
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    /// Caller identity handoff from the upstream auth proxy.
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix used when building public photo URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    /// Root for `snapbook.db` and the photo bucket. Empty means the platform data dir.
    #[serde(default)]
    pub data_dir: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UploadsConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_oembed_endpoint")]
    pub oembed_endpoint: String,
    /// Origin the track page is fetched from; the track path is kept as given.
    #[serde(default = "default_page_base_url")]
    pub page_base_url: String,
    /// Sent with the track page fetch; the page hides meta tags from unknown agents.
    #[serde(default = "default_page_user_agent")]
    pub page_user_agent: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            bucket: default_bucket(),
        }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            oembed_endpoint: default_oembed_endpoint(),
            page_base_url: default_page_base_url(),
            page_user_agent: default_page_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_bucket() -> String {
    "snapbook-photos".to_string()
}

fn default_max_file_size_mb() -> u32 {
    20
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_oembed_endpoint() -> String {
    "https://open.spotify.com/oembed".to_string()
}

fn default_page_base_url() -> String {
    "https://open.spotify.com".to_string()
}

fn default_page_user_agent() -> String {
    "Mozilla/5.0".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_read_timeout_secs() -> u64 {
    7
}

fn default_user_header() -> String {
    "x-snapbook-user".to_string()
}

impl Config {
    /// Size limit for one uploaded file, in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.uploads.max_file_size_mb as usize * 1024 * 1024
    }

    /// Directory holding the database and the photo bucket.
    pub fn data_dir(&self) -> PathBuf {
        if !self.storage.data_dir.trim().is_empty() {
            return PathBuf::from(self.storage.data_dir.trim());
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("snapbook")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("snapbook.db")
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.data_dir().join("storage").join(&self.storage.bucket)
    }
}

/// Clamps loaded values into ranges the service can run with.
pub fn sanitize_config(mut config: Config) -> Config {
    config.uploads.jpeg_quality = config.uploads.jpeg_quality.clamp(1, 100);
    config.uploads.max_file_size_mb = config.uploads.max_file_size_mb.max(1);
    config.enrichment.connect_timeout_secs = config.enrichment.connect_timeout_secs.max(1);
    config.enrichment.read_timeout_secs = config.enrichment.read_timeout_secs.max(1);
    config.server.public_base_url = config
        .server
        .public_base_url
        .trim_end_matches('/')
        .to_string();
    config.enrichment.page_base_url = config
        .enrichment
        .page_base_url
        .trim_end_matches('/')
        .to_string();
    if config.enrichment.page_base_url.is_empty() {
        config.enrichment.page_base_url = default_page_base_url();
    }
    config.auth.user_header = config.auth.user_header.trim().to_ascii_lowercase();
    if config.auth.user_header.is_empty() {
        config.auth.user_header = default_user_header();
    }
    if config.storage.bucket.trim().is_empty() {
        config.storage.bucket = default_bucket();
    }
    config
}

/// Resolves the config file location: `SNAPBOOK_CONFIG` wins over the platform config dir.
pub fn config_file_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

/// Loads the config file, writing a default one first when it does not exist.
pub fn load_or_create(path: &Path) -> std::io::Result<Config> {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string(&Config::default())
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;
        std::fs::write(path, content)?;
    }

    let content = std::fs::read_to_string(path)?;
    let config = match toml::from_str::<Config>(&content) {
        Ok(config) => config,
        Err(error) => {
            warn!(
                "Invalid config file {}, falling back to defaults: {}",
                path.display(),
                error
            );
            Config::default()
        }
    };
    Ok(sanitize_config(config))
}
