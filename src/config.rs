//! Configuration module for the gzecho server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::presentation::{gzip, TextEncoding};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Command-line arguments for the echo server
#[derive(Parser, Debug, Default)]
#[command(name = "gzecho")]
#[command(author = "gzecho authors")]
#[command(version = "0.1.0")]
#[command(about = "A single-connection TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (defaults to this host's resolved address)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum bytes read from the socket in one receive call
    #[arg(short, long)]
    pub buffer_size: Option<usize>,

    /// Text that ends a session
    #[arg(short, long)]
    pub stop_word: Option<String>,

    /// Largest message reassembled across reads, in bytes
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Presentation codec
    #[arg(long, value_enum)]
    pub codec: Option<CodecType>,

    /// Text encoding (utf-8, ascii, latin-1)
    #[arg(short, long)]
    pub encoding: Option<String>,

    /// Gzip compression level, 0 (fastest) to 9 (smallest)
    #[arg(long)]
    pub compression_level: Option<u32>,

    /// Largest decompressed message accepted, in bytes
    #[arg(long)]
    pub max_decoded_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Presentation codec selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CodecType {
    /// Encode, then gzip
    #[default]
    Gzip,
    /// Encode only
    Plain,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub presentation: PresentationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// `[server]` section
#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    /// Address to bind to; resolved from the host name when absent
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_stop_word")]
    pub stop_word: String,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            buffer_size: default_buffer_size(),
            stop_word: default_stop_word(),
            max_message_size: default_max_message_size(),
        }
    }
}

/// `[presentation]` section
#[derive(Debug, Deserialize)]
pub struct PresentationSettings {
    #[serde(default)]
    pub codec: CodecType,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    #[serde(default = "default_max_decoded_size")]
    pub max_decoded_size: usize,
}

impl Default for PresentationSettings {
    fn default() -> Self {
        Self {
            codec: CodecType::default(),
            encoding: default_encoding(),
            compression_level: default_compression_level(),
            max_decoded_size: default_max_decoded_size(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    8000
}

fn default_buffer_size() -> usize {
    64
}

fn default_stop_word() -> String {
    "STOP".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_compression_level() -> u32 {
    1
}

fn default_max_decoded_size() -> usize {
    gzip::DEFAULT_MAX_DECODED
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings owned by the connection handler. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum bytes per receive call
    pub buffer_size: usize,
    pub stop_word: String,
    /// Upper bound on a message reassembled from several reads
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: LOOPBACK.to_string(),
            port: default_port(),
            buffer_size: default_buffer_size(),
            stop_word: default_stop_word(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl ServerConfig {
    /// Resolve `host:port` to the first matching socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let target = format!("{}:{}", self.host, self.port);
        target
            .to_socket_addrs()
            .map_err(|e| ConfigError::Resolve(target.clone(), e.to_string()))?
            .next()
            .ok_or_else(|| ConfigError::Resolve(target, "no addresses found".to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if self.stop_word.is_empty() {
            return Err(ConfigError::EmptyStopWord);
        }
        if self.max_message_size < self.buffer_size {
            return Err(ConfigError::MessageLimitTooSmall {
                max_message_size: self.max_message_size,
                buffer_size: self.buffer_size,
            });
        }
        Ok(())
    }
}

/// Settings owned by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationConfig {
    pub codec: CodecType,
    pub encoding: TextEncoding,
    pub compression_level: u32,
    /// Upper bound on one decompressed message
    pub max_decoded_size: usize,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            codec: CodecType::default(),
            encoding: TextEncoding::default(),
            compression_level: default_compression_level(),
            max_decoded_size: default_max_decoded_size(),
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub presentation: PresentationConfig,
    pub log_level: String,
    /// Host name resolution failed and the server binds to loopback
    pub loopback_fallback: bool,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge CLI args over the TOML file named by `--config`, if any.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = match cli.config {
            Some(ref config_path) => read_toml(config_path)?,
            None => TomlConfig::default(),
        };

        let encoding_name = cli.encoding.unwrap_or(toml_config.presentation.encoding);
        let encoding = encoding_name
            .parse::<TextEncoding>()
            .map_err(|_| ConfigError::InvalidEncoding(encoding_name))?;

        let compression_level = cli
            .compression_level
            .unwrap_or(toml_config.presentation.compression_level);
        if compression_level > gzip::MAX_LEVEL {
            return Err(ConfigError::InvalidCompressionLevel(compression_level));
        }

        let mut loopback_fallback = false;
        let host = match cli.host.or(toml_config.server.host) {
            Some(host) => host,
            None => resolve_local_host().unwrap_or_else(|| {
                loopback_fallback = true;
                LOOPBACK.to_string()
            }),
        };

        let server = ServerConfig {
            host,
            port: cli.port.unwrap_or(toml_config.server.port),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.server.buffer_size),
            stop_word: cli.stop_word.unwrap_or(toml_config.server.stop_word),
            max_message_size: cli
                .max_message_size
                .unwrap_or(toml_config.server.max_message_size),
        };
        server.validate()?;

        Ok(Config {
            server,
            presentation: PresentationConfig {
                codec: cli.codec.unwrap_or(toml_config.presentation.codec),
                encoding,
                compression_level,
                max_decoded_size: cli
                    .max_decoded_size
                    .unwrap_or(toml_config.presentation.max_decoded_size),
            },
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
            loopback_fallback,
        })
    }
}

fn read_toml(path: &Path) -> Result<TomlConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

/// Bind address used when the host name does not resolve.
pub const LOOPBACK: &str = "127.0.0.1";

/// First IPv4 address this machine's host name resolves to.
pub fn resolve_local_host() -> Option<String> {
    local_hostname()
        .and_then(|name| (name.as_str(), 0u16).to_socket_addrs().ok())
        .and_then(|mut addrs| addrs.find(SocketAddr::is_ipv4))
        .map(|addr| addr.ip().to_string())
}

fn local_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..len].to_vec()).ok()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {err}", path = .0.display(), err = .1)]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse config file '{path}': {err}", path = .0.display(), err = .1)]
    TomlParse(PathBuf, toml::de::Error),

    #[error("Unknown text encoding '{0}'")]
    InvalidEncoding(String),

    #[error("Compression level {0} is out of range 0-9")]
    InvalidCompressionLevel(u32),

    #[error("Buffer size must be greater than zero")]
    ZeroBufferSize,

    #[error("Stop word must not be empty")]
    EmptyStopWord,

    #[error("Max message size {max_message_size} is smaller than buffer size {buffer_size}")]
    MessageLimitTooSmall {
        max_message_size: usize,
        buffer_size: usize,
    },

    #[error("Failed to resolve '{0}': {1}")]
    Resolve(String, String),
}
