//! Output-directory handling. An existing non-empty folder is refused
//! unless `--overwrite` was given; the artifact set of a run must never
//! silently mix with a previous one.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

pub fn init_output_dir(path: &Path, overwrite: bool) -> Result<()> {
    if path.exists() {
        let occupied = fs::read_dir(path)
            .with_context(|| format!("cannot read output folder {}", path.display()))?
            .next()
            .is_some();
        if occupied {
            if !overwrite {
                bail!(
                    "output folder {} is not empty; delete/empty manually or call with --overwrite",
                    path.display()
                );
            }
            fs::remove_dir_all(path)
                .with_context(|| format!("cannot empty output folder {}", path.display()))?;
            fs::create_dir_all(path)?;
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("cannot create output folder {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("out");
        init_output_dir(&target, false).expect("init");
        assert!(target.is_dir());
    }

    #[test]
    fn refuses_non_empty_directory_without_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("stale.json"), "{}").expect("write");
        let err = init_output_dir(dir.path(), false).unwrap_err();
        assert!(err.to_string().contains("--overwrite"));
    }

    #[test]
    fn overwrite_empties_the_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("stale.json"), "{}").expect("write");
        init_output_dir(dir.path(), true).expect("init");
        assert!(fs::read_dir(dir.path()).expect("read").next().is_none());
    }
}
