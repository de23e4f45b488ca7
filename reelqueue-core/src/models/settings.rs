use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub remote: RemoteSettings,
    #[serde(default)]
    pub subprocess: SubprocessSettings,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub pacing: PacingSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Quality {
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "1080")]
    P1080,
    #[default]
    #[serde(rename = "720")]
    P720,
    #[serde(rename = "480")]
    P480,
    #[serde(rename = "360")]
    P360,
}

impl Quality {
    pub fn max_height(&self) -> Option<u32> {
        match self {
            Quality::Best => None,
            Quality::P1080 => Some(1080),
            Quality::P720 => Some(720),
            Quality::P480 => Some(480),
            Quality::P360 => Some(360),
        }
    }

    /// Value understood by remote conversion services; they have no "best".
    pub fn remote_label(&self) -> &'static str {
        match self {
            Quality::Best | Quality::P1080 => "1080",
            Quality::P720 => "720",
            Quality::P480 => "480",
            Quality::P360 => "360",
        }
    }
}

impl std::str::FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_end_matches('p').to_lowercase().as_str() {
            "best" | "highest" => Ok(Quality::Best),
            "1080" => Ok(Quality::P1080),
            "720" => Ok(Quality::P720),
            "480" => Ok(Quality::P480),
            "360" => Ok(Quality::P360),
            other => Err(format!("unsupported quality '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    pub output_dir: PathBuf,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub audio_only: bool,
    #[serde(default = "default_true")]
    pub export_manifest: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default = "default_remote_instances")]
    pub instances: Vec<String>,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_remote_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_remote_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubprocessSettings {
    #[serde(default)]
    pub tool_path: Option<PathBuf>,
    #[serde(default = "default_subprocess_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub check_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingSettings {
    #[serde(default = "default_batch_capable_ms")]
    pub batch_capable_ms: u64,
    #[serde(default = "default_remote_conversion_ms")]
    pub remote_conversion_ms: u64,
    #[serde(default = "default_direct_proxy_ms")]
    pub direct_proxy_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default = "default_min_size_bytes")]
    pub min_size_bytes: u64,
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proxy_type")]
    pub proxy_type: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl RemoteSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SubprocessSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TransferSettings {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }
}

fn default_schema_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

pub fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".into()
}

fn default_remote_instances() -> Vec<String> {
    vec![
        "https://cobalt-api.kwiatekmiki.com".into(),
        "https://cobalt-7.kwiatekmiki.com".into(),
    ]
}

fn default_remote_timeout_secs() -> u64 {
    20
}

fn default_remote_max_attempts() -> u32 {
    2
}

fn default_remote_backoff_ms() -> u64 {
    1000
}

fn default_subprocess_timeout_secs() -> u64 {
    600
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_batch_capable_ms() -> u64 {
    8000
}

fn default_remote_conversion_ms() -> u64 {
    3000
}

fn default_direct_proxy_ms() -> u64 {
    2000
}

fn default_min_size_bytes() -> u64 {
    50_000
}

fn default_stall_timeout_secs() -> u64 {
    45
}

fn default_proxy_type() -> String {
    "http".into()
}

fn default_proxy_port() -> u16 {
    8080
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            output_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            quality: Quality::default(),
            audio_only: false,
            export_manifest: true,
            user_agent: default_user_agent(),
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            instances: default_remote_instances(),
            timeout_secs: default_remote_timeout_secs(),
            max_attempts: default_remote_max_attempts(),
            backoff_ms: default_remote_backoff_ms(),
        }
    }
}

impl Default for SubprocessSettings {
    fn default() -> Self {
        Self {
            tool_path: None,
            timeout_secs: default_subprocess_timeout_secs(),
            cookies_file: None,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout_secs(),
            check_url: None,
        }
    }
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            batch_capable_ms: default_batch_capable_ms(),
            remote_conversion_ms: default_remote_conversion_ms(),
            direct_proxy_ms: default_direct_proxy_ms(),
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            min_size_bytes: default_min_size_bytes(),
            stall_timeout_secs: default_stall_timeout_secs(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            download: DownloadSettings::default(),
            remote: RemoteSettings::default(),
            subprocess: SubprocessSettings::default(),
            probe: ProbeSettings::default(),
            pacing: PacingSettings::default(),
            transfer: TransferSettings::default(),
            proxy: ProxySettings::default(),
        }
    }
}
