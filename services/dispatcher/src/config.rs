//! Dispatcher service configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/rusty-transcode/dispatcher.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `paths.data_dir`
//! - `tools.segmenter`
//!
//! Everything else defaults, the path-valued settings relative to the data
//! directory.

use crate::dispatch::DispatchTuning;
use crate::registry::BROADCASTERS_FILE;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Config types (validated)
// ---------------------------------------------------------------------------

/// Top-level dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub schema_version: u32,
    pub paths: PathsConfig,
    pub tools: ToolsConfig,
    pub transcode: TranscodeTuning,
    pub dispatch: DispatchTuning,
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    /// Segment inputs and rendition outputs live here.
    pub work_dir: PathBuf,
    pub broadcasters_file: PathBuf,
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Segmenter command; see `external::CommandSegmenter` for the calling
    /// convention.
    pub segmenter: PathBuf,
    /// Optional downloader command; object-store inputs are rejected when
    /// unset.
    pub downloader: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TranscodeTuning {
    /// Target segment duration in seconds; scales the per-request deadline
    /// and the config payload's timeout multiplier.
    pub target_seg_dur: u64,
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub interval_secs: u64,
    /// Jobs picked per sweep.
    pub batch: u32,
    /// Jobs at or above this failure count are left alone.
    pub max_failures: i64,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    paths: Option<RawPaths>,
    tools: Option<RawTools>,
    transcode: Option<RawTranscode>,
    dispatch: Option<RawDispatch>,
    scanner: Option<RawScanner>,
}

#[derive(Debug, Deserialize)]
struct RawPaths {
    data_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    broadcasters_file: Option<PathBuf>,
    sqlite_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawTools {
    segmenter: Option<PathBuf>,
    downloader: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawTranscode {
    target_seg_dur: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawDispatch {
    max_inflight: Option<usize>,
    passes: Option<u32>,
    attempts: Option<u32>,
    base_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawScanner {
    interval_secs: Option<u64>,
    batch: Option<u32>,
    max_failures: Option<i64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load dispatcher config from the default path
/// `/etc/rusty-transcode/dispatcher.toml`.
pub fn load_config() -> Result<DispatcherConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/rusty-transcode/dispatcher.toml"))
}

/// Load dispatcher config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<DispatcherConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load dispatcher config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<DispatcherConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    // Validate schema_version
    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    // Validate paths + derive defaults from the data dir
    let raw_paths = raw
        .paths
        .ok_or_else(|| ConfigError::MissingField("paths".to_owned()))?;
    let data_dir = raw_paths
        .data_dir
        .ok_or_else(|| ConfigError::MissingField("paths.data_dir".to_owned()))?;
    let paths = PathsConfig {
        work_dir: raw_paths.work_dir.unwrap_or_else(|| data_dir.join("videos")),
        broadcasters_file: raw_paths
            .broadcasters_file
            .unwrap_or_else(|| data_dir.join(BROADCASTERS_FILE)),
        sqlite_path: raw_paths
            .sqlite_path
            .unwrap_or_else(|| data_dir.join("dispatcher.sqlite3")),
        data_dir,
    };

    // Validate tools
    let raw_tools = raw
        .tools
        .ok_or_else(|| ConfigError::MissingField("tools".to_owned()))?;
    let tools = ToolsConfig {
        segmenter: raw_tools
            .segmenter
            .ok_or_else(|| ConfigError::MissingField("tools.segmenter".to_owned()))?,
        downloader: raw_tools.downloader,
    };

    // Transcode defaults
    let transcode = TranscodeTuning {
        target_seg_dur: raw
            .transcode
            .and_then(|t| t.target_seg_dur)
            .unwrap_or(10),
    };
    if transcode.target_seg_dur == 0 {
        return Err(ConfigError::InvalidValue(
            "transcode.target_seg_dur must be at least 1".to_owned(),
        ));
    }

    // Dispatch defaults
    let defaults = DispatchTuning::default();
    let dispatch = match raw.dispatch {
        Some(d) => DispatchTuning {
            max_inflight: d.max_inflight.unwrap_or(defaults.max_inflight),
            passes: d.passes.unwrap_or(defaults.passes),
            attempts: d.attempts.unwrap_or(defaults.attempts),
            base_delay: d
                .base_delay_secs
                .map_or(defaults.base_delay, Duration::from_secs),
        },
        None => defaults,
    };
    if dispatch.max_inflight == 0 || dispatch.passes == 0 || dispatch.attempts == 0 {
        return Err(ConfigError::InvalidValue(
            "dispatch.max_inflight, dispatch.passes and dispatch.attempts must be at least 1"
                .to_owned(),
        ));
    }

    // Scanner defaults
    let scanner = match raw.scanner {
        Some(s) => ScannerConfig {
            interval_secs: s.interval_secs.unwrap_or(60),
            batch: s.batch.unwrap_or(20),
            max_failures: s.max_failures.unwrap_or(10),
        },
        None => ScannerConfig {
            interval_secs: 60,
            batch: 20,
            max_failures: 10,
        },
    };

    Ok(DispatcherConfig {
        schema_version,
        paths,
        tools,
        transcode,
        dispatch,
        scanner,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}
