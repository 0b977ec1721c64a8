//! Logging configuration
//!
//! Deserialized as the `[log]` table of a node configuration file; every
//! field has a default, so an empty table gives JSONL on stdout at `info`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `cogmesh_node=debug,warn`
    pub default_level: String,
    pub console: ConsoleConfig,
    /// Also write JSONL to a file
    pub file: Option<FileConfig>,
    pub json: JsonFields,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::at_level("info")
    }
}

impl LogConfig {
    fn at_level(level: &str) -> Self {
        Self {
            default_level: level.to_string(),
            console: ConsoleConfig::default(),
            file: None,
            json: JsonFields::default(),
        }
    }

    /// Debug level, colored multi-line console
    pub fn development() -> Self {
        let mut config = Self::at_level("debug");
        config.console.pretty = true;
        config.console.ansi = true;
        config
    }

    /// Daily JSONL files under `log_dir` and nothing on the console
    pub fn production(log_dir: PathBuf) -> Self {
        let mut config = Self::at_level("info");
        config.console.enabled = false;
        config.file = Some(FileConfig {
            directory: log_dir,
            ..FileConfig::default()
        });
        config
    }

    pub fn testing() -> Self {
        Self::at_level("warn")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Human-readable lines instead of JSONL
    pub pretty: bool,
    /// Colors; only applies to pretty output
    pub ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pretty: false,
            ansi: false,
        }
    }
}

/// Where JSONL log files go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name stem; rotated files get a date suffix
    pub prefix: String,
    pub rotation: FileRotation,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            prefix: String::from("cogmesh"),
            rotation: FileRotation::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    #[default]
    Daily,
    Hourly,
    /// One `<prefix>.log`, truncated when the node starts
    Never,
}

/// Which fields each JSONL record carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonFields {
    /// Event fields at the top level instead of under `fields`
    pub flatten: bool,
    /// Enclosing spans, which is where the agent id lives
    pub spans: bool,
    pub source_location: bool,
    pub threads: bool,
}

impl Default for JsonFields {
    fn default() -> Self {
        Self {
            flatten: true,
            spans: true,
            source_location: true,
            threads: false,
        }
    }
}
