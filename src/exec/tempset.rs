use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::Set;

/// Registry of scratch artifacts (scripts, completion markers, run directories)
/// created during one pipeline run.
///
/// Paths may be registered from concurrently running tasks; deletion happens once,
/// either through an explicit [`TempResourceSet::cleanup`] call or on drop. Cleanup is
/// best effort: a path that cannot be removed is logged and skipped, it never aborts
/// the removal of the remaining entries.
pub struct TempResourceSet {
    inner: Mutex<Inner>,
    keep: bool,
}

struct Inner {
    files: Set<PathBuf>,
    dirs: Set<PathBuf>,
    drained: bool,
}

impl TempResourceSet {
    pub fn new(keep: bool) -> TempResourceSet {
        TempResourceSet {
            inner: Mutex::new(Inner {
                files: Set::new(),
                dirs: Set::new(),
                drained: false,
            }),
            keep,
        }
    }

    pub fn add_file(&self, path: impl Into<PathBuf>) {
        self.add_files([path.into()]);
    }

    pub fn add_files<P: Into<PathBuf>>(&self, paths: impl IntoIterator<Item = P>) {
        let mut inner = self.lock();
        if inner.drained {
            log::warn!("Registering temporary files after cleanup, they will leak");
            return;
        }
        inner.files.extend(paths.into_iter().map(|p| p.into()));
    }

    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        self.add_dirs([path.into()]);
    }

    pub fn add_dirs<P: Into<PathBuf>>(&self, paths: impl IntoIterator<Item = P>) {
        let mut inner = self.lock();
        if inner.drained {
            log::warn!("Registering temporary directories after cleanup, they will leak");
            return;
        }
        inner.dirs.extend(paths.into_iter().map(|p| p.into()));
    }

    /// Deletes all registered paths. Files first, then directories, so that markers
    /// inside a registered signal directory do not keep it alive.
    pub fn cleanup(&self) {
        let (files, dirs) = {
            let mut inner = self.lock();
            if inner.drained {
                return;
            }
            inner.drained = true;
            (
                std::mem::take(&mut inner.files),
                std::mem::take(&mut inner.dirs),
            )
        };

        if self.keep {
            log::debug!(
                "Keeping {} temporary file(s) and {} director(ies)",
                files.len(),
                dirs.len()
            );
            return;
        }

        for file in &files {
            remove(file, std::fs::remove_file(file));
        }
        for dir in &dirs {
            remove(dir, std::fs::remove_dir_all(dir));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("TempResourceSet lock poisoned")
    }
}

fn remove(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => log::debug!("Removed temporary path {}", path.display()),
        Err(e) => log::warn!("Cannot remove temporary path {}: {e}", path.display()),
    }
}

impl Drop for TempResourceSet {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::TempResourceSet;

    fn touch(path: &Path) {
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn cleanup_removes_registered_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("script.sh");
        let scratch = dir.path().join("scratch");
        touch(&file);
        std::fs::create_dir(&scratch).unwrap();
        touch(&scratch.join("marker.done"));

        let set = TempResourceSet::new(false);
        set.add_file(&file);
        set.add_dir(&scratch);
        set.cleanup();

        assert!(!file.exists());
        assert!(!scratch.exists());
    }

    #[test]
    fn cleanup_survives_invalid_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let valid1 = dir.path().join("a.sh");
        let valid2 = dir.path().join("b.sh");
        touch(&valid1);
        touch(&valid2);

        let set = TempResourceSet::new(false);
        set.add_file(&valid1);
        set.add_file(dir.path().join("does-not-exist.sh"));
        set.add_file(&valid2);
        set.cleanup();

        assert!(!valid1.exists());
        assert!(!valid2.exists());
    }

    #[test]
    fn keep_flag_skips_deletion() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("kept.sh");
        touch(&file);

        let set = TempResourceSet::new(true);
        set.add_file(&file);
        set.cleanup();
        assert!(file.exists());
    }

    #[test]
    fn duplicate_registration_collapses() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("once.sh");
        touch(&file);

        let set = TempResourceSet::new(false);
        set.add_file(&file);
        set.add_files([&file, &file]);
        set.cleanup();
        assert!(!file.exists());
    }

    #[test]
    fn drop_performs_cleanup() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("dropped.sh");
        touch(&file);

        {
            let set = TempResourceSet::new(false);
            set.add_file(&file);
        }
        assert!(!file.exists());
    }
}
