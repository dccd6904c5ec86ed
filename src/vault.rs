use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::persist::write_via_temp;

const MARKDOWN_EXTENSION: &str = "md";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid document path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("vault root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("invalid exclude glob '{pattern}'")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("walking the vault")]
    Walk(#[from] walkdir::Error),
    #[error("{action} {}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A document's identity: its path relative to the vault root. Components
/// are kept exactly as they appear on disk, so names containing `\` or
/// bytes that are not UTF-8 still address the right file. Never absolute and
/// never able to point outside the vault.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentPath(PathBuf);

impl DocumentPath {
    pub fn from_relative(path: &Path) -> Result<Self, VaultError> {
        let invalid = |reason| VaultError::InvalidPath {
            path: path.display().to_string(),
            reason,
        };
        let mut relative = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(invalid("parent directory references are not allowed"));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("expected a path relative to the vault"));
                }
            }
        }
        if relative.as_os_str().is_empty() {
            return Err(invalid("path is empty"));
        }
        Ok(Self(relative))
    }

    #[cfg(test)]
    pub fn new(raw: &str) -> Result<Self, VaultError> {
        Self::from_relative(Path::new(raw))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, part) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("/")?;
            }
            f.write_str(&part.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Where documents come from and go back to during a run.
pub trait DocumentStore {
    fn list(&self) -> Result<Vec<DocumentPath>, VaultError>;
    fn read(&self, doc: &DocumentPath) -> Result<Vec<u8>, VaultError>;
    fn write(&mut self, doc: &DocumentPath, bytes: &[u8]) -> Result<(), VaultError>;
}

/// Markdown files under a directory on disk. Hidden entries (`.obsidian`,
/// `.trash`, `.git`, ...) are never listed.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
    exclude: Option<GlobSet>,
    skip_dirs: Vec<PathBuf>,
}

impl FsVault {
    pub fn open(root: &Path) -> Result<Self, VaultError> {
        let canonical = fs::canonicalize(root).map_err(|source| VaultError::Io {
            action: "resolving vault root",
            path: root.to_path_buf(),
            source,
        })?;
        if !canonical.is_dir() {
            return Err(VaultError::NotADirectory(canonical));
        }
        Ok(Self {
            root: canonical,
            exclude: None,
            skip_dirs: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Globs are matched against `/`-separated paths relative to the root.
    pub fn with_excludes(mut self, patterns: &[String]) -> Result<Self, VaultError> {
        self.exclude = build_exclude_globs(patterns)?;
        Ok(self)
    }

    /// Never descends into `dir`; used to keep an in-vault backup folder out
    /// of the scan.
    pub fn skip_dir(mut self, dir: &Path) -> Self {
        if dir.starts_with(&self.root) && dir != self.root {
            self.skip_dirs.push(dir.to_path_buf());
        }
        self
    }

    fn is_skipped_dir(&self, entry: &DirEntry) -> bool {
        entry.file_type().is_dir() && self.skip_dirs.iter().any(|dir| entry.path() == dir)
    }

    fn is_excluded(&self, relative: &DocumentPath) -> bool {
        self.exclude
            .as_ref()
            .is_some_and(|set| set.is_match(relative.as_path()))
    }
}

impl DocumentStore for FsVault {
    fn list(&self) -> Result<Vec<DocumentPath>, VaultError> {
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !(is_hidden(entry) || self.is_skipped_dir(entry))
            });

        let mut docs = Vec::new();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_markdown(entry.path()) {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| VaultError::InvalidPath {
                    path: entry.path().display().to_string(),
                    reason: "outside the vault root",
                })?;
            let doc = DocumentPath::from_relative(relative)?;
            if self.is_excluded(&doc) {
                debug!(document = %doc, "excluded by glob");
                continue;
            }
            docs.push(doc);
        }
        Ok(docs)
    }

    fn read(&self, doc: &DocumentPath) -> Result<Vec<u8>, VaultError> {
        let path = doc.under(&self.root);
        fs::read(&path).map_err(|source| VaultError::Io {
            action: "reading",
            path,
            source,
        })
    }

    fn write(&mut self, doc: &DocumentPath, bytes: &[u8]) -> Result<(), VaultError> {
        let path = doc.under(&self.root);
        write_via_temp(&path, bytes).map_err(|source| VaultError::Io {
            action: "writing",
            path,
            source,
        })
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(MARKDOWN_EXTENSION))
}

fn build_exclude_globs(patterns: &[String]) -> Result<Option<GlobSet>, VaultError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| VaultError::Glob {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }

    builder.build().map(Some).map_err(|source| VaultError::Glob {
        pattern: patterns.join(", "),
        source,
    })
}
