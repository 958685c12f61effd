// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.
//
// Settings live in a single JSON file.  A missing file is not an error: the
// defaults describe the stock kiosk (576-dot head on /dev/usb/lp0, IPP on
// 6631, raw on 9100, management API on 8080).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PrintheadError, Result};
use crate::types::{BRIGHTNESS_RANGE, CutMode, DEFAULT_BRIGHTNESS, PrintSettings};

/// File name of the configuration inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Environment variable that overrides the configuration path.
pub const CONFIG_ENV: &str = "PRINTHEAD_CONFIG";

/// Password every fresh install starts with.
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// How documents received over IPP are turned into page bitmaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RendererConfig {
    /// Raster images and image-only PDFs, decoded in process.
    Builtin,
    /// External rasterizer writing one PNG per page, e.g.
    /// `pdftoppm -png -r 203 {input} {output}`.
    Command { program: String, args: Vec<String> },
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::Builtin
    }
}

/// Persistent application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Name advertised over mDNS and returned as `printer-name`.
    pub printer_name: String,
    /// Address every listener binds to.
    pub bind_address: String,
    /// Port for the IPP print server.
    pub ipp_port: u16,
    /// Port for the raw passthrough server.
    pub raw_port: u16,
    /// Port for the management API.
    pub api_port: u16,
    pub ipp_enabled: bool,
    pub raw_enabled: bool,
    pub api_enabled: bool,
    /// Character device of the print head.
    pub device_path: PathBuf,
    /// Print density (1-8) sent after the device is initialised.
    pub brightness: u8,
    /// Cutter behaviour at the end of every job.
    pub cut_mode: CutMode,
    /// Blank rows kept below the last inked row before the cut.
    pub trim_margin_rows: usize,
    /// Idle read timeout on accepted sockets.
    pub read_timeout_secs: u64,
    /// Page renderer for IPP documents.
    pub renderer: RendererConfig,
    /// SHA-256 hex digest of the management password.
    pub admin_password_sha256: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            printer_name: "Printhead-Thermal".into(),
            bind_address: "0.0.0.0".into(),
            ipp_port: 6631,
            raw_port: 9100,
            api_port: 8080,
            ipp_enabled: true,
            raw_enabled: true,
            api_enabled: true,
            device_path: PathBuf::from("/dev/usb/lp0"),
            brightness: DEFAULT_BRIGHTNESS,
            cut_mode: CutMode::Full,
            trim_margin_rows: 16,
            read_timeout_secs: 30,
            renderer: RendererConfig::Builtin,
            admin_password_sha256: password_digest(DEFAULT_ADMIN_PASSWORD),
        }
    }
}

impl AppConfig {
    /// Load settings from `path`, falling back to defaults if the file does
    /// not exist.  Values the head or the listeners cannot use are rejected.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the values serde cannot constrain.
    pub fn validate(&self) -> Result<()> {
        if self.printer_name.trim().is_empty() {
            return Err(PrintheadError::Config("printer_name is empty".into()));
        }
        if !BRIGHTNESS_RANGE.contains(&self.brightness) {
            return Err(PrintheadError::Config(format!(
                "brightness {} outside {}-{}",
                self.brightness,
                BRIGHTNESS_RANGE.start(),
                BRIGHTNESS_RANGE.end()
            )));
        }
        if self.read_timeout_secs == 0 {
            return Err(PrintheadError::Config("read_timeout_secs must be positive".into()));
        }
        if let RendererConfig::Command { program, .. } = &self.renderer {
            if program.trim().is_empty() {
                return Err(PrintheadError::Config("renderer program is empty".into()));
            }
        }
        Ok(())
    }

    /// Write settings to `path` as pretty-printed JSON.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// The runtime-adjustable part of the configuration.
    pub fn print_settings(&self) -> PrintSettings {
        PrintSettings {
            cut_mode: self.cut_mode,
            brightness: self.brightness,
        }
    }

    /// Read timeout as a `Duration`.
    pub fn read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.read_timeout_secs)
    }

    /// Whether `password` matches the stored digest.
    pub fn verify_password(&self, password: &str) -> bool {
        password_digest(password) == self.admin_password_sha256
    }

    /// Replace the stored password digest.
    pub fn set_admin_password(&mut self, password: &str) {
        self.admin_password_sha256 = password_digest(password);
    }

    /// Whether the password is still the factory default.
    pub fn is_default_password(&self) -> bool {
        self.verify_password(DEFAULT_ADMIN_PASSWORD)
    }
}

/// Hex SHA-256 of a password.
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Resolve the configuration path: explicit argument, then
/// `$PRINTHEAD_CONFIG`, then `<data dir>/config.json`.
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| data_dir().join(CONFIG_FILE))
}

/// Return the application data directory.
pub fn data_dir() -> PathBuf {
    // Try XDG data dir, then fallback to home
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("printhead");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share").join("printhead");
    }
    PathBuf::from("/tmp").join("printhead")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_kiosk() {
        let config = AppConfig::default();
        assert_eq!(config.ipp_port, 6631);
        assert_eq!(config.raw_port, 9100);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.trim_margin_rows, 16);
        assert_eq!(config.cut_mode, CutMode::Full);
        assert!(config.is_default_password());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.printer_name, AppConfig::default().printer_name);
    }

    #[test]
    fn persist_then_load_keeps_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.cut_mode = CutMode::Partial;
        config.renderer = RendererConfig::Command {
            program: "pdftoppm".into(),
            args: vec!["-png".into(), "{input}".into(), "{output}".into()],
        };
        config.set_admin_password("s3cret");
        config.persist(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.cut_mode, CutMode::Partial);
        assert_eq!(loaded.renderer, config.renderer);
        assert!(loaded.verify_password("s3cret"));
        assert!(!loaded.is_default_password());
    }

    #[test]
    fn partial_file_fills_remaining_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{ "raw_port": 9200 }"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.raw_port, 9200);
        assert_eq!(config.ipp_port, 6631);
    }

    #[test]
    fn out_of_range_brightness_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{ "brightness": 9 }"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(PrintheadError::Config(_))));
    }

    #[test]
    fn validate_rejects_unusable_values() {
        assert!(AppConfig::default().validate().is_ok());

        let unnamed = AppConfig {
            printer_name: "  ".into(),
            ..AppConfig::default()
        };
        assert!(matches!(unnamed.validate(), Err(PrintheadError::Config(_))));

        let no_timeout = AppConfig {
            read_timeout_secs: 0,
            ..AppConfig::default()
        };
        assert!(no_timeout.validate().is_err());

        let no_program = AppConfig {
            renderer: RendererConfig::Command {
                program: String::new(),
                args: Vec::new(),
            },
            ..AppConfig::default()
        };
        assert!(no_program.validate().is_err());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
