//! Input discovery
//!
//! Bots are the subdirectories of the input root; their logs are every file with
//! the configured extension anywhere below the bot directory.

use crate::error::CanParseError;
use std::fs;
use std::path::{Path, PathBuf};

/// List bot directories below `input_dir`, sorted by name
pub fn list_bots(input_dir: &Path) -> Result<Vec<String>, CanParseError> {
    let mut bots = Vec::new();
    for entry in fs::read_dir(input_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            bots.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    bots.sort();
    Ok(bots)
}

/// Expand a requested bot list; `*` anywhere in it selects every bot
pub fn resolve_bots(requested: &[String], input_dir: &Path) -> Result<Vec<String>, CanParseError> {
    if requested.iter().any(|bot| bot == "*") {
        return list_bots(input_dir);
    }
    Ok(requested.to_vec())
}

/// Recursively collect log files below `dir` in path order
pub fn find_log_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, CanParseError> {
    fn visit(dir: &Path, extension: &str, files: &mut Vec<PathBuf>) -> Result<(), CanParseError> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                visit(&path, extension, files)?;
            } else if path
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case(extension))
            {
                files.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    visit(dir, extension, &mut files)?;
    files.sort();
    Ok(files)
}
