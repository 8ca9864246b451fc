//! Parse the backend configuration from the environment.
use std::ffi::OsString;

/// Tunables of a [`Backend`](crate::Backend).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Override the medium probe: `Some(true)` treats every file mapping as persistent memory,
    /// `Some(false)` never does.
    pub force_pmem: Option<bool>,
    /// Attempt a mapping with synchronous page faults before falling back to a shared mapping.
    pub map_sync: bool,
}

impl Options {
    /// Same convention as the persistent memory development kit: `1` or `0`.
    pub const FORCE_PMEM_VAR: &'static str = "PMEM_IS_PMEM_FORCE";
    pub const NO_MAP_SYNC_VAR: &'static str = "NVCHUNK_NO_MAP_SYNC";

    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var_os(name))
    }

    pub(crate) fn from_vars(var: impl Fn(&str) -> Option<OsString>) -> Self {
        let mut options = Options::default();

        if let Some(force) = var(Self::FORCE_PMEM_VAR) {
            match force.to_str() {
                Some("1") => options.force_pmem = Some(true),
                Some("0") => options.force_pmem = Some(false),
                _ => tracing::warn!(
                    value = ?force,
                    "ignoring {}, expected `0` or `1`",
                    Self::FORCE_PMEM_VAR,
                ),
            }
        }

        if let Some(no_sync) = var(Self::NO_MAP_SYNC_VAR) {
            options.map_sync = no_sync.to_str() != Some("1");
        }

        options
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            force_pmem: None,
            map_sync: true,
        }
    }
}
