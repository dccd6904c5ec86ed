use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::persist::write_via_temp;
use crate::vault::DocumentPath;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("creating backup directory {}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing backup {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("backup {} would overwrite a document in the vault", .path.display())]
    IntoVault { path: PathBuf },
}

/// Copies original document bytes to `{root}/{document path}` before the
/// document is overwritten. A later backup of the same document replaces the
/// earlier one.
#[derive(Debug, Clone)]
pub struct BackupWriter {
    root: PathBuf,
    vault_root: Option<PathBuf>,
}

impl BackupWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            vault_root: None,
        }
    }

    /// Refuses destinations inside `vault_root`, unless the backup root is
    /// a proper subfolder of the vault (which the vault listing skips).
    pub fn protecting(mut self, vault_root: &Path) -> Self {
        self.vault_root = Some(vault_root.to_path_buf());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn destination(&self, doc: &DocumentPath) -> PathBuf {
        doc.under(&self.root)
    }

    pub fn backup(&self, doc: &DocumentPath, original: &[u8]) -> Result<PathBuf, BackupError> {
        let destination = self.destination(doc);
        if self.lands_in_vault(&destination) {
            return Err(BackupError::IntoVault { path: destination });
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|source| BackupError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        write_via_temp(&destination, original).map_err(|source| BackupError::Write {
            path: destination.clone(),
            source,
        })?;
        Ok(destination)
    }

    fn lands_in_vault(&self, destination: &Path) -> bool {
        let Some(vault) = &self.vault_root else {
            return false;
        };
        let nested_backup_dir = self.root != *vault && self.root.starts_with(vault);
        destination.starts_with(vault) && !nested_backup_dir
    }
}
