//! Configuration
//!
//! Two environment variables locate everything the parser touches:
//! - `CANPARSERDATAPATH`: data root holding `input/`, `output/` and `plot/`
//! - `CANPARSERCONFIGPATH`: directory with an optional `canparser.toml`

use crate::error::CanParseError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the data root
pub const DATA_PATH_VAR: &str = "CANPARSERDATAPATH";
/// Environment variable naming the configuration directory
pub const CONFIG_PATH_VAR: &str = "CANPARSERCONFIGPATH";
/// File looked up inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "canparser.toml";

/// Names of the columns the router needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    /// Hexadecimal COB-ID column
    pub id: String,
    /// Hexadecimal data bytes column
    pub payload: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            id: "ID".to_string(),
            payload: "DataBytes".to_string(),
        }
    }
}

/// Settings read from `canparser.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Default `tracing` filter when `RUST_LOG` is not set
    pub log_filter: String,
    /// Remove input files once they are fully processed
    pub delete_input_files: bool,
    /// Extension of the CANEdge exports to pick up
    pub input_extension: String,
    pub columns: ColumnConfig,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            delete_input_files: false,
            input_extension: "csv".to_string(),
            columns: ColumnConfig::default(),
        }
    }
}

impl ParserConfig {
    /// Parse a TOML document
    pub fn from_toml(raw: &str) -> Result<Self, CanParseError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load `canparser.toml` from `dir`, falling back to defaults when absent
    pub fn load_dir(dir: &Path) -> Result<Self, CanParseError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_toml(&fs::read_to_string(path)?)
    }
}

/// Directory layout below the data root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn plot_dir(&self) -> PathBuf {
        self.root.join("plot")
    }

    pub fn bot_input_dir(&self, bot: &str) -> PathBuf {
        self.input_dir().join(bot)
    }

    pub fn bot_output_dir(&self, bot: &str) -> PathBuf {
        self.output_dir().join(bot)
    }

    /// The three append-mode logs of a bot
    pub fn bot_outputs(&self, bot: &str) -> OutputPaths {
        let dir = self.bot_output_dir(bot);
        OutputPaths {
            heartbeats: dir.join(format!("{}_CAN_heartbeats.log", bot)),
            transactions: dir.join(format!("{}_CAN_psu_sdos.log", bot)),
            timestamped: dir.join(format!("{}_CAN_timestamped.log", bot)),
        }
    }
}

/// Output file paths of one bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub heartbeats: PathBuf,
    pub transactions: PathBuf,
    pub timestamped: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = ParserConfig::load_dir(dir.path()).unwrap();
        assert_eq!(config, ParserConfig::default());
        assert_eq!(config.columns.id, "ID");
        assert_eq!(config.columns.payload, "DataBytes");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ParserConfig::from_toml(
            r#"
            delete_input_files = true

            [columns]
            payload = "Data"
            "#,
        )
        .unwrap();

        assert!(config.delete_input_files);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.columns.id, "ID");
        assert_eq!(config.columns.payload, "Data");
    }

    #[test]
    fn test_load_dir_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "log_filter = \"canedge_parser=debug\"\n",
        )
        .unwrap();

        let config = ParserConfig::load_dir(dir.path()).unwrap();
        assert_eq!(config.log_filter, "canedge_parser=debug");
    }

    #[test]
    fn test_invalid_toml() {
        let err = ParserConfig::from_toml("delete_input_files = \"maybe\"").unwrap_err();
        assert!(matches!(err, CanParseError::ConfigError(_)));
    }

    #[test]
    fn test_bot_output_paths() {
        let layout = DataLayout::new("/data");
        let outputs = layout.bot_outputs("bot7");

        assert_eq!(layout.bot_input_dir("bot7"), PathBuf::from("/data/input/bot7"));
        assert_eq!(
            outputs.heartbeats,
            PathBuf::from("/data/output/bot7/bot7_CAN_heartbeats.log")
        );
        assert_eq!(
            outputs.transactions,
            PathBuf::from("/data/output/bot7/bot7_CAN_psu_sdos.log")
        );
        assert_eq!(
            outputs.timestamped,
            PathBuf::from("/data/output/bot7/bot7_CAN_timestamped.log")
        );
    }
}
