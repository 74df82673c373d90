//! In-memory [`HdfsAccessor`] for tests.

use crate::hdfs::traits::{
    ErrorKind, HdfsAccessor, HdfsError, HdfsResult, basename, dirname,
};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

/// Filesystem kept in a map of absolute path to file content.
///
/// Clones share the same storage, so a test can keep a handle while the
/// stage owns another.
#[derive(Clone, Default)]
pub struct FakeHdfs {
    storage: Arc<Mutex<FakeFs>>,
}

impl FakeHdfs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file (creating its parent directories).
    pub fn insert(&self, path: &str, data: impl Into<Vec<u8>>) {
        let mut fs = self.storage.lock().expect("storage mutex poisoned");
        add_dirs(&mut fs.dirs, dirname(path));
        fs.files.insert(normalize(path), data.into());
    }

    /// Content of a file, if present.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        let fs = self.storage.lock().expect("storage mutex poisoned");
        fs.files.get(&normalize(path)).cloned()
    }

    /// All file paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let fs = self.storage.lock().expect("storage mutex poisoned");
        fs.files.keys().cloned().collect()
    }

    #[must_use]
    pub fn is_dir(&self, dir: &str) -> bool {
        let fs = self.storage.lock().expect("storage mutex poisoned");
        fs.dirs.contains(&normalize(dir))
    }
}

impl HdfsAccessor for FakeHdfs {
    fn list_files(&self, dir: &str) -> HdfsResult<Vec<String>> {
        let dir = normalize(dir);
        let fs = self.storage.lock().expect("storage mutex poisoned");
        if !fs.dirs.contains(&dir) {
            return Err(HdfsError::new(
                ErrorKind::NotFound,
                format!("{dir}: No such file or directory"),
            ));
        }
        // BTreeMap keys come out sorted
        Ok(fs
            .files
            .keys()
            .filter(|path| normalize(dirname(path)) == dir)
            .map(|path| basename(path).to_string())
            .collect())
    }

    fn open(&self, path: &str) -> HdfsResult<Box<dyn Read + Send>> {
        let data = self.get(path).ok_or_else(|| {
            HdfsError::new(
                ErrorKind::NotFound,
                format!("{path}: No such file or directory"),
            )
        })?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn make_dirs(&self, dir: &str) -> HdfsResult<()> {
        let mut fs = self.storage.lock().expect("storage mutex poisoned");
        add_dirs(&mut fs.dirs, dir);
        Ok(())
    }

    fn put_file(&self, local: &Path, dest: &str) -> HdfsResult<()> {
        let data = std::fs::read(local)?;
        let mut fs = self.storage.lock().expect("storage mutex poisoned");
        let dest = normalize(dest);
        if fs.files.contains_key(&dest) {
            return Err(HdfsError::new(
                ErrorKind::AlreadyExists,
                format!("{dest}: File exists"),
            ));
        }
        if !fs.dirs.contains(&normalize(dirname(&dest))) {
            return Err(HdfsError::new(
                ErrorKind::NotFound,
                format!("{}: No such file or directory", dirname(&dest)),
            ));
        }
        fs.files.insert(dest, data);
        Ok(())
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn add_dirs(dirs: &mut BTreeSet<String>, dir: &str) {
    let mut current = normalize(dir);
    loop {
        let parent = normalize(dirname(&current));
        let done = current == "/" || parent == current;
        dirs.insert(current);
        if done {
            break;
        }
        current = parent;
    }
}
