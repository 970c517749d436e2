use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{Result, TextGenError};

/// Creates the parent directory of `path` and returns it.
///
/// With `empty`, plain files already in that directory are removed
/// (subdirectories are left alone), except the files listed in `keep`.
/// Clearing needs an explicit parent: a bare file name is a `Config` error
/// rather than a request to clear the working directory.
pub fn make_dirs<P: AsRef<Path>>(path: P, empty: bool, keep: &[&Path]) -> Result<PathBuf> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ if empty => {
            return Err(TextGenError::Config(format!(
                "{path:?} has no parent directory; refusing to clear the working directory"
            )))
        }
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    if empty {
        // Keep paths that do not exist yet are dropped here.
        let kept: Vec<PathBuf> = keep.iter().filter_map(|p| fs::canonicalize(p).ok()).collect();
        for entry in fs::read_dir(&dir)? {
            let entry_path = entry?.path();
            if !entry_path.is_file() {
                continue;
            }
            if kept.contains(&fs::canonicalize(&entry_path)?) {
                log::debug!("keeping {:?}", entry_path);
                continue;
            }
            log::debug!("removing stale file {:?}", entry_path);
            fs::remove_file(&entry_path)?;
        }
    }
    Ok(dir)
}

/// Writes `bytes` to `<path>.tmp` then renames it over `path`.
pub fn write_atomic<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, bytes)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Reads at most `max_bytes` from the start of a text file, decoding lossily.
pub fn read_text_prefix<P: AsRef<Path>>(path: P, max_bytes: usize) -> Result<String> {
    let mut raw = Vec::with_capacity(max_bytes);
    fs::File::open(path.as_ref())?
        .take(max_bytes as u64)
        .read_to_end(&mut raw)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_dirs_clears_files_only() {
        let root = tempfile::tempdir().unwrap();
        let checkpoint = root.path().join("ckpt").join("model.bin");
        let dir = make_dirs(&checkpoint, false, &[]).unwrap();
        fs::write(dir.join("old.bin"), b"stale").unwrap();
        fs::create_dir(dir.join("logs")).unwrap();

        make_dirs(&checkpoint, true, &[]).unwrap();
        assert!(!dir.join("old.bin").exists());
        assert!(dir.join("logs").is_dir());
    }

    #[test]
    fn make_dirs_keeps_listed_files() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("data");
        fs::create_dir(&dir).unwrap();
        let corpus = dir.join("input.txt");
        fs::write(&corpus, "to be or not to be").unwrap();
        fs::write(dir.join("old.bin"), b"stale").unwrap();

        // A differently spelled path to the same file still protects it.
        let spelled = dir.join(".").join("input.txt");
        let missing = dir.join("train.log");
        make_dirs(dir.join("model.bin"), true, &[spelled.as_path(), missing.as_path()]).unwrap();
        assert_eq!(fs::read_to_string(&corpus).unwrap(), "to be or not to be");
        assert!(!dir.join("old.bin").exists());
    }

    #[test]
    fn clearing_without_a_parent_is_a_config_error() {
        assert!(matches!(make_dirs("model.bin", true, &[]), Err(TextGenError::Config(_))));
        assert_eq!(make_dirs("model.log", false, &[]).unwrap(), PathBuf::from("."));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("state.bin");
        write_atomic(&path, b"abc").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"abc");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn prefix_read_is_bounded() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("corpus.txt");
        fs::write(&path, "abcdefghij").unwrap();
        assert_eq!(read_text_prefix(&path, 4).unwrap(), "abcd");
        assert_eq!(read_text_prefix(&path, 100).unwrap(), "abcdefghij");
    }
}
