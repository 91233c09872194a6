// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Names (or paths) of the external programs the handlers delegate to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub tesseract: String,
    pub c44: String,
    pub cjb2: String,
    pub djvm: String,
    pub djvused: String,
    pub tiffcp: String,
    pub tiffinfo: String,
    pub pdfimages: String,
    /// Shell used for user-defined commands and post-save hooks.
    pub shell: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            tesseract: "tesseract".into(),
            c44: "c44".into(),
            cjb2: "cjb2".into(),
            djvm: "djvm".into(),
            djvused: "djvused".into(),
            tiffcp: "tiffcp".into(),
            tiffinfo: "tiffinfo".into(),
            pdfimages: "pdfimages".into(),
            shell: "sh".into(),
        }
    }
}

/// Persistent engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory under which session directories are created.
    pub scratch_root: PathBuf,
    /// Warn when the session filesystem has less free space than this (MiB).
    pub free_space_warning_mib: u64,
    /// Default tesseract language.
    pub ocr_language: String,
    pub tools: ToolPaths,
    /// Downsample PDF page images to this resolution, if set.
    pub pdf_downsample_dpi: Option<f64>,
    /// JPEG quality (1-100) when exporting pages as JPEG images.
    pub jpeg_quality: u8,
    /// How often the CLI drains the response channel, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir(),
            free_space_warning_mib: 300,
            ocr_language: "eng".into(),
            tools: ToolPaths::default(),
            pdf_downsample_dpi: None,
            jpeg_quality: 75,
            poll_interval_ms: 50,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanwerk.json");
        std::fs::write(&path, r#"{"ocr_language":"deu","tools":{"tiffcp":"/opt/bin/tiffcp"}}"#)
            .unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.ocr_language, "deu");
        assert_eq!(config.tools.tiffcp, "/opt/bin/tiffcp");
        assert_eq!(config.tools.djvm, "djvm");
        assert_eq!(config.jpeg_quality, 75);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanwerk.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanwerk.json");
        let mut config = EngineConfig::default();
        config.pdf_downsample_dpi = Some(150.0);
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }
}
