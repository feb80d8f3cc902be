//! Application configuration for ReportHarvest.
//!
//! User config lives at `~/.reportharvest/reportharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "reportharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".reportharvest";

// ---------------------------------------------------------------------------
// Config structs (matching reportharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Batch defaults.
    #[serde(default)]
    pub run: RunConfig,

    /// HTTP transport settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Retry/backoff policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Upstream report endpoint parameters.
    #[serde(default)]
    pub report: ReportConfig,
}

/// `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum concurrently-active item pipelines.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Newline-delimited identifier list.
    #[serde(default = "default_ids")]
    pub ids: String,

    /// Directory holding one CSV per completed item.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Final ZIP archive path.
    #[serde(default = "default_archive")]
    pub archive: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            ids: default_ids(),
            output_dir: default_output_dir(),
            archive: default_archive(),
        }
    }
}

fn default_workers() -> usize {
    150
}
fn default_ids() -> String {
    "ids.txt".into()
}
fn default_output_dir() -> String {
    "results_csv".into()
}
fn default_archive() -> String {
    "all_grades.zip".into()
}

/// `[network]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Report server root; endpoint paths are appended to it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Route all requests through `proxy_url`.
    #[serde(default)]
    pub use_proxy: bool,

    /// Forward proxy (`http://`, `https://`, `socks5://` or `socks5h://`).
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            use_proxy: false,
            proxy_url: default_proxy_url(),
        }
    }
}

fn default_base_url() -> String {
    "http://rpsjw.cdut.edu.cn/qzbb".into()
}
fn default_user_agent() -> String {
    "curl/7.29.0".into()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    30
}
fn default_proxy_url() -> String {
    "socks5://127.0.0.1:10801".into()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per phase, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit; the n-th retry waits `base_delay_ms * 2^n`.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// HTTP statuses treated as transient.
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

fn default_max_attempts() -> u32 {
    6
}
fn default_base_delay() -> u64 {
    300
}
fn default_retryable_statuses() -> Vec<u16> {
    vec![429, 502, 503, 504]
}

/// `[report]` section: the two-phase render protocol parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Report definition rendered by the server.
    #[serde(default = "default_report_file")]
    pub report_file: String,

    /// Form field carrying the item identifier.
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Fixed form fields sent with the handle request.
    #[serde(default = "default_form_fields")]
    pub form_fields: BTreeMap<String, String>,

    /// Fixed query parameters sent with the artifact request.
    #[serde(default = "default_render_params")]
    pub render_params: BTreeMap<String, String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            report_file: default_report_file(),
            id_field: default_id_field(),
            form_fields: default_form_fields(),
            render_params: default_render_params(),
        }
    }
}

fn default_report_file() -> String {
    "/148656-XSCJDXSD.rpx".into()
}
fn default_id_field() -> String {
    "xsxh".into()
}
fn default_form_fields() -> BTreeMap<String, String> {
    [("selShowType", "all"), ("kclx", "0")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
fn default_render_params() -> BTreeMap<String, String> {
    [
        ("action", "3"),
        ("columns", "0"),
        ("srcType", "file"),
        ("excelFormat", "2003"),
        ("width", "0"),
        ("height", "0"),
        ("pageStyle", "0"),
        ("formula", "0"),
        ("tips", "yes"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// ---------------------------------------------------------------------------
// Harvest settings (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// CLI-supplied values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub workers: Option<usize>,
    pub ids: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    /// `true` forces the proxy on; `false` defers to the config file.
    pub use_proxy: bool,
}

/// Runtime harvest configuration: merged from config file + CLI flags and validated.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub workers: usize,
    pub ids_path: PathBuf,
    pub output_dir: PathBuf,
    pub archive_path: PathBuf,
    pub base_url: Url,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Proxy in effect for this run, if any.
    pub proxy: Option<Url>,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub retryable_statuses: Vec<u16>,
    pub report: ReportConfig,
}

impl HarvestSettings {
    /// Merge `overrides` over `config` and validate the result.
    pub fn resolve(config: &AppConfig, overrides: &SettingsOverrides) -> Result<Self> {
        let workers = overrides.workers.unwrap_or(config.run.workers);
        if workers == 0 {
            return Err(HarvestError::config("workers must be greater than zero"));
        }
        if config.retry.max_attempts == 0 {
            return Err(HarvestError::config(
                "retry.max_attempts must be greater than zero",
            ));
        }

        let base_url = Url::parse(&config.network.base_url).map_err(|e| {
            HarvestError::config(format!(
                "invalid network.base_url '{}': {e}",
                config.network.base_url
            ))
        })?;

        let proxy = if overrides.use_proxy || config.network.use_proxy {
            let url = Url::parse(&config.network.proxy_url).map_err(|e| {
                HarvestError::config(format!(
                    "invalid network.proxy_url '{}': {e}",
                    config.network.proxy_url
                ))
            })?;
            match url.scheme() {
                "http" | "https" | "socks5" | "socks5h" => Some(url),
                other => {
                    return Err(HarvestError::config(format!(
                        "unsupported proxy scheme '{other}'"
                    )));
                }
            }
        } else {
            None
        };

        Ok(Self {
            workers,
            ids_path: overrides
                .ids
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.run.ids)),
            output_dir: overrides
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.run.output_dir)),
            archive_path: overrides
                .archive
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.run.archive)),
            base_url,
            user_agent: config.network.user_agent.clone(),
            connect_timeout: Duration::from_secs(config.network.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.network.read_timeout_secs),
            proxy,
            max_attempts: config.retry.max_attempts,
            base_delay: Duration::from_millis(config.retry.base_delay_ms),
            retryable_statuses: config.retry.retryable_statuses.clone(),
            report: config.report.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.reportharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.reportharvest/reportharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        HarvestError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
