/*!
 * Configuration types for remotebuild
 *
 * Settings come from two layers: a configuration document (JSON, YAML or
 * TOML, picked by file extension) and explicit invocation parameters. A
 * non-empty invocation parameter always wins; an empty or absent one falls
 * back to the document.
 */

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the private key passphrase, if the key has one
pub const PASSPHRASE_ENV: &str = "REMOTEBUILD_KEY_PASSPHRASE";

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Mode applied to every uploaded file
pub const DEFAULT_FILE_MODE: i32 = 0o644;

/// Errors produced while loading or resolving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {message}")]
    Write { path: PathBuf, message: String },

    #[error("{} must be specified via flags or config", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Serialization format of a configuration document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    Toml,
}

impl DocumentFormat {
    /// `.yaml`/`.yml` → YAML, `.toml` → TOML, anything else → JSON
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            Some("toml") => DocumentFormat::Toml,
            _ => DocumentFormat::Json,
        }
    }
}

/// The configuration document as written on disk
///
/// Every field is optional; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Remote host name or address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// SSH user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Path to the private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Local directory that receives artifacts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// known_hosts file used to verify the host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<String>,

    /// Pinned host key, `SHA256:<base64>` as printed by `ssh-keygen -l`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key_fingerprint: Option<String>,

    /// Skip host identity verification entirely
    pub accept_any_host_key: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,

    /// Glob patterns (relative to the source root) excluded from upload
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl FileConfig {
    /// Load a document, choosing the parser from the file extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, DocumentFormat::from_path(path)).map_err(|message| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            }
        })
    }

    /// Load a document that may legitimately be absent
    ///
    /// A missing file at the default location is `Ok(None)`. When the path
    /// was named explicitly, a missing file is an error like any other.
    pub fn load_optional(path: &Path, explicit: bool) -> Result<Option<Self>, ConfigError> {
        match Self::from_file(path) {
            Ok(doc) => Ok(Some(doc)),
            Err(ConfigError::Read { ref source, .. })
                if !explicit && source.kind() == std::io::ErrorKind::NotFound =>
            {
                tracing::debug!("No configuration document at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn parse(contents: &str, format: DocumentFormat) -> Result<Self, String> {
        match format {
            DocumentFormat::Json => serde_json::from_str(contents).map_err(|e| e.to_string()),
            DocumentFormat::Yaml => {
                // An empty YAML document deserializes as unit, not as a map
                if contents.trim().is_empty() {
                    return Ok(Self::default());
                }
                serde_yaml::from_str(contents).map_err(|e| e.to_string())
            }
            DocumentFormat::Toml => toml::from_str(contents).map_err(|e| e.to_string()),
        }
    }

    pub fn render(&self, format: DocumentFormat) -> Result<String, String> {
        match format {
            DocumentFormat::Json => serde_json::to_string_pretty(self).map_err(|e| e.to_string()),
            DocumentFormat::Yaml => serde_yaml::to_string(self).map_err(|e| e.to_string()),
            DocumentFormat::Toml => toml::to_string_pretty(self).map_err(|e| e.to_string()),
        }
    }

    /// Save the document, format chosen by extension
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self
            .render(DocumentFormat::from_path(path))
            .map_err(|message| ConfigError::Write {
                path: path.to_path_buf(),
                message,
            })?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Starter document written by `remotebuild init`
    pub fn template() -> Self {
        Self {
            host: Some("build-host.example.com".to_string()),
            user: Some("builder".to_string()),
            key: Some("~/.ssh/id_ed25519".to_string()),
            target_dir: Some("./artifacts".to_string()),
            port: Some(DEFAULT_PORT),
            exclude: vec![".git".to_string(), "build".to_string()],
            ..Default::default()
        }
    }
}

/// Pick the effective value of one setting
///
/// A flag that is absent, empty or whitespace-only falls back to the document.
pub fn merge_setting(flag: Option<&str>, document: Option<&str>) -> Option<String> {
    fn present(value: Option<&str>) -> Option<&str> {
        value.filter(|v| !v.trim().is_empty())
    }
    present(flag).or(present(document)).map(str::to_string)
}

/// Expand a leading `~/` against the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// How the remote host's identity is verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept whatever key the host presents
    AcceptAny,
    /// Require a matching entry in an OpenSSH known_hosts file
    KnownHosts(PathBuf),
    /// Require the host key's SHA-256 fingerprint to equal this value
    Fingerprint(String),
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::AcceptAny => write!(f, "accept-any"),
            HostKeyPolicy::KnownHosts(path) => write!(f, "known-hosts ({})", path.display()),
            HostKeyPolicy::Fingerprint(fp) => write!(f, "fingerprint ({})", fp),
        }
    }
}

/// Connection-related invocation parameters, before merging
#[derive(Debug, Clone, Default)]
pub struct ConnectionOverrides {
    pub host: Option<String>,
    pub user: Option<String>,
    pub key: Option<String>,
    pub target_dir: Option<String>,
    pub port: Option<u16>,
    pub known_hosts: Option<String>,
    pub host_key_fingerprint: Option<String>,
    pub accept_any_host_key: bool,
    pub connect_timeout_secs: Option<u64>,
}

/// Fully resolved connection parameters; immutable once built
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub user: String,
    pub key_path: PathBuf,
    pub target_dir: PathBuf,
    pub port: u16,
    pub host_key_policy: HostKeyPolicy,
    pub passphrase: Option<SecretString>,
    pub connect_timeout: Option<Duration>,
}

impl ConnectionSettings {
    /// Settings with defaults for everything but the four required fields
    ///
    /// The default host key policy checks `~/.ssh/known_hosts`.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        key_path: impl Into<PathBuf>,
        target_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            key_path: key_path.into(),
            target_dir: target_dir.into(),
            port: DEFAULT_PORT,
            host_key_policy: HostKeyPolicy::KnownHosts(default_known_hosts()),
            passphrase: None,
            connect_timeout: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_passphrase(mut self, passphrase: SecretString) -> Self {
        self.passphrase = Some(passphrase);
        self
    }

    /// Merge invocation parameters over the (optional) document
    ///
    /// Fails with every missing required field listed at once.
    pub fn resolve(
        overrides: &ConnectionOverrides,
        document: Option<&FileConfig>,
    ) -> Result<Self, ConfigError> {
        let doc = document.cloned().unwrap_or_default();

        let host = merge_setting(overrides.host.as_deref(), doc.host.as_deref());
        let user = merge_setting(overrides.user.as_deref(), doc.user.as_deref());
        let key = merge_setting(overrides.key.as_deref(), doc.key.as_deref());
        let target_dir = merge_setting(overrides.target_dir.as_deref(), doc.target_dir.as_deref());

        let (host, user, key, target_dir) = match (host, user, key, target_dir) {
            (Some(h), Some(u), Some(k), Some(t)) => (h, u, k, t),
            (h, u, k, t) => {
                let mut missing = Vec::new();
                if h.is_none() {
                    missing.push("host");
                }
                if u.is_none() {
                    missing.push("user");
                }
                if k.is_none() {
                    missing.push("key");
                }
                if t.is_none() {
                    missing.push("target-dir");
                }
                return Err(ConfigError::Missing(missing));
            }
        };

        // Any host-key flag overrides the document's whole policy
        let host_key_policy = match pick_host_key_policy(
            overrides.accept_any_host_key,
            overrides.host_key_fingerprint.as_deref(),
            overrides.known_hosts.as_deref(),
        )? {
            Some(policy) => policy,
            None => pick_host_key_policy(
                doc.accept_any_host_key,
                doc.host_key_fingerprint.as_deref(),
                doc.known_hosts.as_deref(),
            )?
            .unwrap_or_else(|| HostKeyPolicy::KnownHosts(default_known_hosts())),
        };

        let connect_timeout = overrides
            .connect_timeout_secs
            .or(doc.connect_timeout_secs)
            .map(Duration::from_secs);

        let passphrase = std::env::var(PASSPHRASE_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .map(SecretString::from);

        Ok(Self {
            host,
            user,
            key_path: expand_home(&key),
            target_dir: PathBuf::from(target_dir),
            port: overrides.port.or(doc.port).unwrap_or(DEFAULT_PORT),
            host_key_policy,
            passphrase,
            connect_timeout,
        })
    }

    /// `user@host:port`
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Policy named by one source (flags or document), if it names any
///
/// Within a source: accept-any, then fingerprint, then known_hosts.
fn pick_host_key_policy(
    accept_any: bool,
    fingerprint: Option<&str>,
    known_hosts: Option<&str>,
) -> Result<Option<HostKeyPolicy>, ConfigError> {
    if accept_any {
        return Ok(Some(HostKeyPolicy::AcceptAny));
    }
    if let Some(fp) = merge_setting(fingerprint, None) {
        return Ok(Some(HostKeyPolicy::Fingerprint(normalize_fingerprint(&fp)?)));
    }
    Ok(merge_setting(known_hosts, None).map(|path| HostKeyPolicy::KnownHosts(expand_home(&path))))
}

fn default_known_hosts() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ssh").join("known_hosts"))
        .unwrap_or_else(|| PathBuf::from(".ssh/known_hosts"))
}

/// Accept `SHA256:xxxx` or a bare base64 digest; strip trailing padding
fn normalize_fingerprint(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let digest = trimmed.strip_prefix("SHA256:").unwrap_or(trimmed);
    let digest = digest.trim_end_matches('=');
    if digest.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "host key fingerprint '{}' is empty",
            raw
        )));
    }
    Ok(format!("SHA256:{}", digest))
}

/// What to build and how
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Local project root
    pub src: PathBuf,
    /// Remote project root; the build runs in `<remote_dir>/build`
    pub remote_dir: String,
    pub build_type: String,
    /// Extra configure arguments, passed verbatim
    pub cmake_args: String,
    /// Paths relative to the remote build directory to fetch afterwards
    pub artifacts: Vec<String>,
    /// Build tool invoked remotely
    pub toolchain: String,
    /// Fixed parallelism; `None` asks the remote host (`$(nproc)`)
    pub jobs: Option<u32>,
    pub exclude: Vec<String>,
    pub forward_stdin: bool,
    pub command_timeout: Option<Duration>,
    pub file_mode: i32,
    pub show_progress: bool,
}

impl BuildSettings {
    pub fn new(src: impl Into<PathBuf>, remote_dir: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            remote_dir: remote_dir.into(),
            build_type: "Release".to_string(),
            cmake_args: String::new(),
            artifacts: Vec::new(),
            toolchain: "cmake".to_string(),
            jobs: None,
            exclude: Vec::new(),
            forward_stdin: true,
            command_timeout: None,
            file_mode: DEFAULT_FILE_MODE,
            show_progress: false,
        }
    }

    /// `src` and `remote-dir` are both required and checked before anything else
    pub fn require(src: Option<&str>, remote_dir: Option<&str>) -> Result<Self, ConfigError> {
        let src = src.filter(|s| !s.trim().is_empty());
        let remote_dir = remote_dir.filter(|s| !s.trim().is_empty());
        match (src, remote_dir) {
            (Some(s), Some(r)) => Ok(Self::new(s, r)),
            (s, r) => {
                let mut missing = Vec::new();
                if s.is_none() {
                    missing.push("src");
                }
                if r.is_none() {
                    missing.push("remote-dir");
                }
                Err(ConfigError::Missing(missing))
            }
        }
    }
}

/// Parse the comma-separated artifact list; blanks are dropped
pub fn parse_artifacts(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub log_level: LogLevel,
    /// Log file path (None = stderr)
    pub log_file: Option<PathBuf>,
    /// Shorthand for log_level = debug
    pub verbose: bool,
}
