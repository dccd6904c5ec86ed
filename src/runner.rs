use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backup::{BackupError, BackupWriter};
use crate::encoding::{EncodingStrategy, looks_binary};
use crate::rewrite::EmbedLinkRewriter;
use crate::vault::{DocumentPath, DocumentStore, VaultError};

/// What to do with the rest of the run when a document cannot be backed up.
/// The document itself is never overwritten either way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum BackupFailurePolicy {
    #[default]
    Skip,
    Abort,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub on_backup_failure: BackupFailurePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub scanned: usize,
    pub repaired: usize,
    pub replacements: usize,
    pub backup_failures: usize,
    pub skipped_binary: usize,
    pub backup_root: PathBuf,
    pub dry_run: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "Would repair" } else { "Repaired" };
        write!(
            f,
            "✔ Scanned {} files • {verb} {} • Replacements {}",
            self.scanned, self.repaired, self.replacements
        )?;
        if self.backup_failures > 0 {
            write!(f, " • Backup failures {}", self.backup_failures)?;
        }
        if self.skipped_binary > 0 {
            write!(f, " • Skipped binary {}", self.skipped_binary)?;
        }
        write!(f, "\nBackup folder: {}", self.backup_root.display())?;
        if self.dry_run {
            f.write_str(" (dry-run, nothing written)")?;
        }
        Ok(())
    }
}

/// Per-document progress reported while a run is underway.
#[derive(Debug)]
pub enum DocumentEvent<'a> {
    Repaired {
        doc: &'a DocumentPath,
        replacements: usize,
        backup: &'a Path,
    },
    Previewed {
        doc: &'a DocumentPath,
        replacements: usize,
        original: &'a str,
        rewritten: &'a str,
    },
    BackupFailed {
        doc: &'a DocumentPath,
        error: &'a BackupError,
    },
    SkippedBinary {
        doc: &'a DocumentPath,
    },
}

pub trait RunObserver {
    fn on_document(&mut self, event: DocumentEvent<'_>);
}

impl RunObserver for () {
    fn on_document(&mut self, _event: DocumentEvent<'_>) {}
}

/// A run that stopped early. `summary` counts only the documents handled
/// before the failure.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("listing documents")]
    List {
        summary: RunSummary,
        #[source]
        source: VaultError,
    },
    #[error("reading {doc}")]
    Read {
        doc: DocumentPath,
        summary: RunSummary,
        #[source]
        source: VaultError,
    },
    #[error("backing up {doc}; run aborted before overwriting it")]
    Backup {
        doc: DocumentPath,
        summary: RunSummary,
        #[source]
        source: BackupError,
    },
    #[error("overwriting {doc} (its original is saved at {})", .backup.display())]
    Write {
        doc: DocumentPath,
        backup: PathBuf,
        summary: RunSummary,
        #[source]
        source: VaultError,
    },
}

impl RunError {
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunError::List { summary, .. }
            | RunError::Read { summary, .. }
            | RunError::Backup { summary, .. }
            | RunError::Write { summary, .. } => summary,
        }
    }
}

pub struct BatchRunner<'a> {
    rewriter: &'a EmbedLinkRewriter,
    backups: &'a BackupWriter,
    encoding: &'a EncodingStrategy,
    options: RunOptions,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        rewriter: &'a EmbedLinkRewriter,
        backups: &'a BackupWriter,
        encoding: &'a EncodingStrategy,
        options: RunOptions,
    ) -> Self {
        Self {
            rewriter,
            backups,
            encoding,
            options,
        }
    }

    /// One pass over every document, strictly in the store's order. A
    /// document is overwritten only after its original bytes were backed up.
    pub fn run<S, O>(&self, store: &mut S, observer: &mut O) -> Result<RunSummary, RunError>
    where
        S: DocumentStore + ?Sized,
        O: RunObserver + ?Sized,
    {
        let mut summary = RunSummary {
            backup_root: self.backups.root().to_path_buf(),
            dry_run: self.options.dry_run,
            ..RunSummary::default()
        };

        let docs = match store.list() {
            Ok(docs) => docs,
            Err(source) => return Err(RunError::List { summary, source }),
        };
        info!(documents = docs.len(), dry_run = self.options.dry_run, "starting run");

        for doc in docs {
            summary.scanned += 1;

            let original = match store.read(&doc) {
                Ok(bytes) => bytes,
                Err(source) => {
                    return Err(RunError::Read {
                        doc,
                        summary,
                        source,
                    });
                }
            };

            if looks_binary(&original) {
                debug!(document = %doc, "skipping suspected binary file");
                summary.skipped_binary += 1;
                observer.on_document(DocumentEvent::SkippedBinary { doc: &doc });
                continue;
            }

            let decoded = self.encoding.decode(&original);
            if decoded.had_errors {
                warn!(
                    document = %doc,
                    encoding = decoded.decision.encoding.name(),
                    detected_by = %decoded.decision.source,
                    "decoding errors encountered; continuing"
                );
            }

            let rewrite = self.rewriter.rewrite(&decoded.text);
            if !rewrite.changed() {
                debug!(document = %doc, "no wrapped embeds");
                continue;
            }

            if self.options.dry_run {
                summary.repaired += 1;
                summary.replacements += rewrite.replacements;
                observer.on_document(DocumentEvent::Previewed {
                    doc: &doc,
                    replacements: rewrite.replacements,
                    original: &decoded.text,
                    rewritten: &rewrite.text,
                });
                continue;
            }

            let backup = match self.backups.backup(&doc, &original) {
                Ok(path) => path,
                Err(source) => match self.options.on_backup_failure {
                    BackupFailurePolicy::Skip => {
                        warn!(document = %doc, error = %source, "backup failed; document left untouched");
                        summary.backup_failures += 1;
                        observer.on_document(DocumentEvent::BackupFailed {
                            doc: &doc,
                            error: &source,
                        });
                        continue;
                    }
                    BackupFailurePolicy::Abort => {
                        return Err(RunError::Backup {
                            doc,
                            summary,
                            source,
                        });
                    }
                },
            };

            let encoded = decoded.encode(&rewrite.text);
            if encoded.had_errors {
                warn!(
                    document = %doc,
                    encoding = decoded.decision.encoding.name(),
                    "encoding fallback occurred while writing; output may be lossy"
                );
            }
            if let Err(source) = store.write(&doc, &encoded.bytes) {
                return Err(RunError::Write {
                    doc,
                    backup,
                    summary,
                    source,
                });
            }

            summary.repaired += 1;
            summary.replacements += rewrite.replacements;
            observer.on_document(DocumentEvent::Repaired {
                doc: &doc,
                replacements: rewrite.replacements,
                backup: &backup,
            });
        }

        info!(
            scanned = summary.scanned,
            repaired = summary.repaired,
            replacements = summary.replacements,
            "run finished"
        );
        Ok(summary)
    }
}
