use std::fs;
use std::io::{self, Write};
use std::path::Path;

use time::OffsetDateTime;

/// Writes `data` to a hidden sibling temp file, syncs it and renames it over
/// `path`. Missing parent directories are created first.
pub fn write_via_temp(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir)?;
    }
    let base_dir = parent.unwrap_or_else(|| Path::new("."));
    let unique = format!(
        ".embedfix-tmp-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    );
    let temp_path = base_dir.join(unique);
    let written = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_parents_and_replaces_content() {
        let temp = tempdir().expect("temp dir");
        let target = temp.path().join("a").join("b").join("note.md");
        write_via_temp(&target, b"first").expect("first write");
        write_via_temp(&target, b"second").expect("second write");
        assert_eq!(fs::read(&target).expect("read back"), b"second");
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let temp = tempdir().expect("temp dir");
        write_via_temp(&temp.path().join("note.md"), b"body").expect("write");
        let names: Vec<_> = fs::read_dir(temp.path())
            .expect("list dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("note.md")]);
    }

    #[test]
    fn reports_failure_when_parent_is_a_file() {
        let temp = tempdir().expect("temp dir");
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, b"not a dir").expect("write blocker");
        assert!(write_via_temp(&blocker.join("note.md"), b"body").is_err());
    }
}
