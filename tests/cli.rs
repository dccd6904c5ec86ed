#![allow(deprecated)]

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const BROKEN: &str = "# Trip\n\n[ ![[ photos/beach.jpg ]] ](https://example.com/beach.jpg)\n\nSee also [![[map.pdf]]](https://example.com/map.pdf).\n";
const FIXED: &str = "# Trip\n\n![[photos/beach.jpg]]\n\nSee also ![[map.pdf]].\n";

fn embedfix() -> Command {
    Command::new(cargo_bin("embedfix"))
}

fn write(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn vault_fixture() -> (TempDir, std::path::PathBuf) {
    let temp = TempDir::new().unwrap();
    let vault = temp.path().join("Vault");
    write(&vault, "Travel/trip.md", BROKEN);
    write(&vault, "clean.md", "![[already.png]]\n");
    write(&vault, ".obsidian/app.md", BROKEN);
    (temp, vault)
}

#[test]
fn run_repairs_notes_and_backs_up_originals_next_to_the_vault() {
    let (temp, vault) = vault_fixture();

    embedfix()
        .args(["run", "--vault"])
        .arg(&vault)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Scanned 2 files • Repaired 1 • Replacements 2",
        ))
        .stdout(predicate::str::contains("Backup folder:"))
        .stdout(predicate::str::contains("repaired Travel/trip.md"));

    assert_eq!(fs::read_to_string(vault.join("Travel/trip.md")).unwrap(), FIXED);
    let backup_root = temp.path().join("Backup-Fix-Embed-Links");
    assert_eq!(
        fs::read_to_string(backup_root.join("Travel/trip.md")).unwrap(),
        BROKEN
    );
    assert!(!backup_root.join("clean.md").exists());
    assert_eq!(
        fs::read_to_string(vault.join(".obsidian/app.md")).unwrap(),
        BROKEN
    );
}

#[test]
fn dry_run_with_diff_changes_nothing() {
    let (temp, vault) = vault_fixture();

    embedfix()
        .args(["run", "--dry-run", "--diff", "--color", "never", "--vault"])
        .arg(&vault)
        .assert()
        .success()
        .stdout(predicate::str::contains("would repair Travel/trip.md (2 replacement(s))"))
        .stdout(predicate::str::contains("+ ![[photos/beach.jpg]]"))
        .stdout(predicate::str::contains("Would repair 1"));

    assert_eq!(fs::read_to_string(vault.join("Travel/trip.md")).unwrap(), BROKEN);
    assert!(!temp.path().join("Backup-Fix-Embed-Links").exists());
}

#[test]
fn json_summary_is_machine_readable() {
    let (_temp, vault) = vault_fixture();

    let output = embedfix()
        .args(["run", "--json", "--vault"])
        .arg(&vault)
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["scanned"], 2);
    assert_eq!(summary["repaired"], 1);
    assert_eq!(summary["replacements"], 2);
    assert_eq!(summary["backup_failures"], 0);
}

#[test]
fn configured_backup_dir_is_used_by_later_runs() {
    let (temp, vault) = vault_fixture();

    embedfix()
        .args(["config", "--vault"])
        .arg(&vault)
        .args(["set-backup-dir", "  _backups  "])
        .assert()
        .success()
        .stdout(predicate::str::contains("backupDir: _backups"));

    let settings_file = vault.join(".obsidian/plugins/fix-embed-links/data.json");
    let stored: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&settings_file).unwrap()).unwrap();
    assert_eq!(stored["backupDir"], "_backups");

    embedfix()
        .args(["run", "--vault"])
        .arg(&vault)
        .assert()
        .success();

    assert_eq!(
        fs::read_to_string(vault.join("_backups/Travel/trip.md")).unwrap(),
        BROKEN
    );
    assert!(!temp.path().join("Backup-Fix-Embed-Links").exists());

    // The in-vault backup folder must not be scanned on the next run.
    embedfix()
        .args(["run", "--vault"])
        .arg(&vault)
        .assert()
        .success()
        .stdout(predicate::str::contains("Scanned 2 files • Repaired 0"));
}

#[test]
fn blank_backup_dir_falls_back_to_default() {
    let (_temp, vault) = vault_fixture();

    embedfix()
        .args(["config", "--vault"])
        .arg(&vault)
        .args(["set-backup-dir", "   "])
        .assert()
        .success();

    embedfix()
        .args(["config", "--vault"])
        .arg(&vault)
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("backupDir: ../Backup-Fix-Embed-Links"));
}

#[test]
fn unwritable_backup_folder_leaves_notes_untouched_and_fails() {
    let (temp, vault) = vault_fixture();
    let blocker = temp.path().join("blocker");
    fs::write(&blocker, "a file where a folder should be").unwrap();

    embedfix()
        .args(["run", "--vault"])
        .arg(&vault)
        .arg("--backup-dir")
        .arg(&blocker)
        .assert()
        .failure()
        .stdout(predicate::str::contains("skipped Travel/trip.md"))
        .stdout(predicate::str::contains("Backup failures 1"))
        .stderr(predicate::str::contains("left unmodified"));

    assert_eq!(fs::read_to_string(vault.join("Travel/trip.md")).unwrap(), BROKEN);
}

#[test]
fn backup_folder_equal_to_the_vault_is_rejected() {
    let (temp, vault) = vault_fixture();

    embedfix()
        .args(["run", "--backup-dir", ".", "--vault"])
        .arg(&vault)
        .assert()
        .failure()
        .stderr(predicate::str::contains("must not be the vault"));
    assert_eq!(fs::read_to_string(vault.join("Travel/trip.md")).unwrap(), BROKEN);

    embedfix()
        .args(["config", "--vault"])
        .arg(&vault)
        .args(["set-backup-dir", ".."])
        .assert()
        .success();
    embedfix()
        .args(["run", "--vault"])
        .arg(&vault)
        .assert()
        .failure()
        .stderr(predicate::str::contains("must not be the vault"));
    assert_eq!(fs::read_to_string(vault.join("Travel/trip.md")).unwrap(), BROKEN);
    assert!(!temp.path().join("Travel").exists());
}

#[test]
fn missing_vault_is_an_error() {
    let temp = TempDir::new().unwrap();
    embedfix()
        .args(["run", "--vault"])
        .arg(temp.path().join("nope"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("opening vault"));
}
