#![allow(dead_code)]
use std::path::{Path, PathBuf};

use nv_chunk::{Backend, Options};
use tempfile::TempDir;

pub const MB: usize = 1 << 20;

/// A scratch directory for backing files.
///
/// Placed below `PMEM_MNTPT` when that is set, to run against a real persistent memory mount.
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn new() -> Self {
        let mut builder = tempfile::Builder::new();
        builder.prefix("nv-chunk");
        let dir = match std::env::var_os("PMEM_MNTPT") {
            Some(mount) => builder.tempdir_in(mount),
            None => builder.tempdir(),
        };

        Scratch {
            dir: dir.expect("to create a scratch directory"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn path_str(&self, name: &str) -> String {
        self.path(name).to_str().expect("utf-8 scratch path").to_owned()
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// A backend ignoring `PMEM_IS_PMEM_FORCE` of the environment.
pub fn backend() -> Backend {
    Backend::with_options(Options::default())
}
