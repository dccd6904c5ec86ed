//! The one persisted option, `backupDir`, and where it is stored.
//!
//! Settings live in `<vault>/.obsidian/plugins/fix-embed-links/data.json`,
//! the same file the vault's editor keeps plugin data in, so an existing
//! configuration is picked up as-is. Resolution order, lowest first:
//!
//! 1. Compiled default: [`DEFAULT_BACKUP_DIR`].
//! 2. The persisted JSON file (missing file or key falls back to 1).
//! 3. A one-shot `--backup-dir` flag on `embedfix run` (never persisted).

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persist::write_via_temp;

pub const DEFAULT_BACKUP_DIR: &str = "../Backup-Fix-Embed-Links";
pub const SETTINGS_RELATIVE_PATH: &str = ".obsidian/plugins/fix-embed-links/data.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading settings {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings file {} is not valid JSON", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding settings")]
    Encode(#[from] serde_json::Error),
    #[error("writing settings {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Relative (to the vault root) or absolute backup directory.
    pub backup_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backup_dir: DEFAULT_BACKUP_DIR.to_string(),
        }
    }
}

impl Settings {
    /// Trims `value`; blank input falls back to the default.
    pub fn set_backup_dir(&mut self, value: &str) {
        let trimmed = value.trim();
        self.backup_dir = if trimmed.is_empty() {
            DEFAULT_BACKUP_DIR.to_string()
        } else {
            trimmed.to_string()
        };
    }

    pub fn backup_root(&self, vault_root: &Path) -> PathBuf {
        resolve_against(vault_root, &self.backup_dir)
    }
}

/// Joins `value` onto `base` (an absolute `value` wins) and folds `.` and
/// `..` without touching the filesystem.
pub fn resolve_against(base: &Path, value: &str) -> PathBuf {
    normalize_lexically(&base.join(value))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Load/save boundary for [`Settings`].
pub trait SettingsStore {
    fn load(&self) -> Result<Settings, SettingsError>;
    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;
}

#[derive(Debug, Clone)]
pub struct JsonSettingsFile {
    path: PathBuf,
}

impl JsonSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_vault(vault_root: &Path) -> Self {
        Self::new(resolve_against(vault_root, SETTINGS_RELATIVE_PATH))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsFile {
    fn load(&self) -> Result<Settings, SettingsError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Settings::default());
        }
        // `null` is what an editor writes before any setting was saved.
        let stored: Option<Settings> =
            serde_json::from_slice(&data).map_err(|source| SettingsError::Parse {
                path: self.path.clone(),
                source,
            })?;
        let mut settings = stored.unwrap_or_default();
        let raw = settings.backup_dir.clone();
        settings.set_backup_dir(&raw);
        Ok(settings)
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let mut json = serde_json::to_vec_pretty(settings)?;
        json.push(b'\n');
        write_via_temp(&self.path, &json).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempdir().expect("temp dir");
        let store = JsonSettingsFile::in_vault(temp.path());
        assert_eq!(store.load().expect("load"), Settings::default());
    }

    #[test]
    fn round_trips_a_custom_backup_dir() {
        let temp = tempdir().expect("temp dir");
        let store = JsonSettingsFile::in_vault(temp.path());
        let mut settings = Settings::default();
        settings.set_backup_dir("  /srv/backups/vault  ");
        store.save(&settings).expect("save");
        assert_eq!(store.load().expect("load").backup_dir, "/srv/backups/vault");
        assert!(
            temp.path()
                .join(".obsidian/plugins/fix-embed-links/data.json")
                .is_file()
        );
    }

    #[test]
    fn blank_input_saves_the_default() {
        let temp = tempdir().expect("temp dir");
        let store = JsonSettingsFile::new(temp.path().join("data.json"));
        let mut settings = Settings::default();
        settings.set_backup_dir("custom");
        settings.set_backup_dir(" \t ");
        store.save(&settings).expect("save");
        assert_eq!(store.load().expect("load").backup_dir, DEFAULT_BACKUP_DIR);
    }

    #[test]
    fn persisted_values_merge_over_defaults() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("data.json");
        let store = JsonSettingsFile::new(&path);

        fs::write(&path, "null").expect("write null");
        assert_eq!(store.load().expect("load null"), Settings::default());

        fs::write(&path, r#"{"somethingElse": true}"#).expect("write other key");
        assert_eq!(store.load().expect("load other"), Settings::default());

        fs::write(&path, r#"{"backupDir": "   "}"#).expect("write blank");
        assert_eq!(store.load().expect("load blank"), Settings::default());

        fs::write(&path, r#"{"backupDir": "Archive/fixes"}"#).expect("write value");
        assert_eq!(store.load().expect("load value").backup_dir, "Archive/fixes");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("data.json");
        fs::write(&path, "{not json").expect("write");
        let err = JsonSettingsFile::new(&path).load().unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn backup_root_resolves_against_the_vault() {
        let vault = Path::new("/home/me/Vault");
        let settings = Settings::default();
        assert_eq!(
            settings.backup_root(vault),
            PathBuf::from("/home/me/Backup-Fix-Embed-Links")
        );

        let mut absolute = Settings::default();
        absolute.set_backup_dir("/var/backups/./vault");
        assert_eq!(absolute.backup_root(vault), PathBuf::from("/var/backups/vault"));

        assert_eq!(resolve_against(Path::new("/"), "../x"), PathBuf::from("/x"));
        assert_eq!(resolve_against(Path::new("a"), "../../b"), PathBuf::from("../b"));
    }
}
