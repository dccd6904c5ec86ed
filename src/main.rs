use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use is_terminal::IsTerminal;
use tracing_subscriber::EnvFilter;

mod backup;
mod diff;
mod encoding;
mod persist;
mod rewrite;
mod runner;
mod settings;
mod vault;

use backup::BackupWriter;
use diff::DiffDisplayConfig;
use encoding::EncodingStrategy;
use rewrite::EmbedLinkRewriter;
use runner::{BackupFailurePolicy, BatchRunner, DocumentEvent, RunObserver, RunOptions, RunSummary};
use settings::{JsonSettingsFile, Settings, SettingsStore, resolve_against};
use vault::FsVault;

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq, Default)]
enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn should_color(self) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => io::stdout().is_terminal(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli)
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(cmd) => handle_run(cmd)?,
        Command::Config(cmd) => handle_config(cmd)?,
    }

    Ok(())
}

fn handle_run(cmd: RunCommand) -> Result<()> {
    let encoding = EncodingStrategy::new(cmd.encoding.as_deref())?;
    let vault = FsVault::open(&cmd.common.vault)
        .with_context(|| format!("opening vault {}", cmd.common.vault.display()))?;
    let store = cmd.common.settings_store(vault.root());
    let settings = store
        .load()
        .with_context(|| format!("loading settings from {}", store.path().display()))?;

    let backup_root = match cmd.backup_dir.as_deref().map(str::trim) {
        Some(dir) if !dir.is_empty() => resolve_against(vault.root(), dir),
        _ => settings.backup_root(vault.root()),
    };
    if vault.root().starts_with(&backup_root) {
        bail!(
            "backup folder {} must not be the vault or a folder containing it",
            backup_root.display()
        );
    }
    let mut vault = vault
        .with_excludes(&cmd.exclude)?
        .skip_dir(&backup_root);

    let options = RunOptions {
        dry_run: cmd.dry_run,
        on_backup_failure: cmd.on_backup_failure,
    };
    if !cmd.json {
        print_run_header(&cmd, &vault, &encoding, &backup_root, &store);
    }

    let rewriter = EmbedLinkRewriter::new()?;
    let backups = BackupWriter::new(&backup_root).protecting(vault.root());
    let runner = BatchRunner::new(&rewriter, &backups, &encoding, options);
    let mut reporter = CliReporter {
        quiet: cmd.json,
        diff: cmd.diff.then(|| DiffDisplayConfig {
            context: cmd.context,
            colorize: cmd.color.should_color(),
        }),
    };

    let summary = match runner.run(&mut vault, &mut reporter) {
        Ok(summary) => summary,
        Err(err) => {
            report_summary(err.summary(), cmd.json)?;
            return Err(err).context("run stopped early");
        }
    };
    report_summary(&summary, cmd.json)?;

    if summary.backup_failures > 0 {
        bail!(
            "{} document(s) were left unmodified because their backup could not be written",
            summary.backup_failures
        );
    }
    Ok(())
}

fn handle_config(cmd: ConfigCommand) -> Result<()> {
    let vault_root = cmd.common.vault_root()?;
    let store = cmd.common.settings_store(&vault_root);
    match cmd.action {
        ConfigAction::Show => {
            let settings = store
                .load()
                .with_context(|| format!("loading settings from {}", store.path().display()))?;
            print_settings(&settings, &store, &vault_root);
        }
        ConfigAction::SetBackupDir { value } => {
            let mut settings = store
                .load()
                .with_context(|| format!("loading settings from {}", store.path().display()))?;
            settings.set_backup_dir(&value);
            store.save(&settings)?;
            println!("saved {}", store.path().display());
            print_settings(&settings, &store, &vault_root);
        }
        ConfigAction::Reset => {
            let settings = Settings::default();
            store.save(&settings)?;
            println!("reset {}", store.path().display());
            print_settings(&settings, &store, &vault_root);
        }
    }
    Ok(())
}

fn print_settings(settings: &Settings, store: &JsonSettingsFile, vault_root: &Path) {
    println!("settings file: {}", store.path().display());
    println!("backupDir: {}", settings.backup_dir);
    println!(
        "resolved backup folder: {}",
        settings.backup_root(vault_root).display()
    );
}

fn print_run_header(
    cmd: &RunCommand,
    vault: &FsVault,
    encoding: &EncodingStrategy,
    backup_root: &Path,
    store: &JsonSettingsFile,
) {
    println!("command: run");
    println!("mode: {}", if cmd.dry_run { "dry-run" } else { "apply" });
    println!("vault: {}", vault.root().display());
    println!("settings: {}", store.path().display());
    println!("backup folder: {}", backup_root.display());
    println!("encoding strategy: {}", encoding.describe());
    println!("on backup failure: {:?}", cmd.on_backup_failure);
    if !cmd.exclude.is_empty() {
        println!("exclude globs: {:?}", cmd.exclude);
    }
    println!("---");
}

fn report_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}

/// Prints one line per touched document, plus a diff for previews.
struct CliReporter {
    quiet: bool,
    diff: Option<DiffDisplayConfig>,
}

impl RunObserver for CliReporter {
    fn on_document(&mut self, event: DocumentEvent<'_>) {
        if self.quiet {
            return;
        }
        match event {
            DocumentEvent::Repaired {
                doc,
                replacements,
                backup,
            } => {
                println!("backup saved: {doc} -> {}", backup.display());
                println!("repaired {doc} ({replacements} replacement(s))");
            }
            DocumentEvent::Previewed {
                doc,
                replacements,
                original,
                rewritten,
            } => {
                println!("would repair {doc} ({replacements} replacement(s))");
                if let Some(config) = self.diff {
                    println!("--- preview: {doc} ---");
                    print!("{}", diff::render_diff(original, rewritten, config));
                }
            }
            DocumentEvent::BackupFailed { doc, error } => {
                let cause = std::error::Error::source(error)
                    .map(|source| format!(": {source}"))
                    .unwrap_or_default();
                println!("skipped {doc}: {error}{cause}");
            }
            DocumentEvent::SkippedBinary { doc } => {
                println!("skipping {doc} (suspected binary file)");
            }
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "embedfix",
    version,
    about = "Repair embeds wrapped in external links across a Markdown vault"
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rewrite `[![[file]]](url)` to `![[file]]` in every note, backing up
    /// each changed note first.
    Run(RunCommand),
    /// Show or change the persisted backup folder.
    Config(ConfigCommand),
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    /// Vault root directory.
    #[arg(long, value_name = "DIR", default_value = ".", value_hint = ValueHint::DirPath)]
    vault: PathBuf,
    /// Settings file; defaults to the plugin data file inside the vault.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    settings: Option<PathBuf>,
}

impl CommonArgs {
    fn vault_root(&self) -> Result<PathBuf> {
        std::fs::canonicalize(&self.vault)
            .with_context(|| format!("resolving vault {}", self.vault.display()))
    }

    fn settings_store(&self, vault_root: &Path) -> JsonSettingsFile {
        match &self.settings {
            Some(path) => JsonSettingsFile::new(path),
            None => JsonSettingsFile::in_vault(vault_root),
        }
    }
}

#[derive(Debug, Args)]
struct RunCommand {
    #[command(flatten)]
    common: CommonArgs,
    /// Back up into DIR for this run only (relative to the vault).
    #[arg(long, value_name = "DIR")]
    backup_dir: Option<String>,
    /// Report what would change without writing anything.
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
    /// With --dry-run, print a line diff for each document.
    #[arg(long, action = ArgAction::SetTrue, requires = "dry_run")]
    diff: bool,
    #[arg(long, default_value_t = 3)]
    context: usize,
    #[arg(long = "color", value_enum, default_value = "auto")]
    color: ColorChoice,
    /// Decode documents without a byte order mark using this encoding.
    #[arg(long, value_name = "ENCODING")]
    encoding: Option<String>,
    /// Skip documents whose vault-relative path matches GLOB.
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,
    #[arg(long = "on-backup-failure", value_enum, default_value = "skip")]
    on_backup_failure: BackupFailurePolicy,
    /// Print the summary as JSON and nothing else.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct ConfigCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the effective settings.
    Show,
    /// Persist a new backup folder; blank input restores the default.
    SetBackupDir {
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    /// Persist the default backup folder.
    Reset,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_skip_policy_and_current_dir() {
        let cli = Cli::try_parse_from(["embedfix", "run"]).expect("parse");
        let Command::Run(cmd) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(cmd.common.vault, PathBuf::from("."));
        assert_eq!(cmd.on_backup_failure, BackupFailurePolicy::Skip);
        assert!(!cmd.dry_run);
    }

    #[test]
    fn diff_requires_dry_run() {
        assert!(Cli::try_parse_from(["embedfix", "run", "--diff"]).is_err());
        assert!(Cli::try_parse_from(["embedfix", "run", "--dry-run", "--diff"]).is_ok());
    }
}
