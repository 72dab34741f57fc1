//! Helpers shared by unit tests.

use std::path::{Path, PathBuf};

/// A unique directory under the system temp dir, removed on drop.
pub struct Scratch(PathBuf);

impl Scratch {
    pub fn new(label: &str) -> Self {
        Self(std::env::temp_dir().join(format!("tabport-{label}-{}", uuid::Uuid::new_v4().simple())))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn join(&self, child: &str) -> PathBuf {
        self.0.join(child)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn directory_is_removed_on_drop() {
        let scratch = Scratch::new("scratch");
        std::fs::create_dir_all(scratch.join("nested")).unwrap();
        let root = scratch.path().to_path_buf();
        assert!(root.exists());
        drop(scratch);
        assert!(!root.exists());
    }
}
