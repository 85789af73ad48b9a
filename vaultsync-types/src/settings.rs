//! User-facing synchronization settings.

use serde::{Deserialize, Serialize};

/// Configuration options affecting core sync behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    /// Encrypt chunk and metadata payloads end-to-end.
    pub encrypt: bool,
    /// Passphrase for key derivation (empty when encryption is off).
    pub passphrase: String,
    /// Scale KDF iterations inversely with passphrase length.
    pub use_dynamic_iteration_count: bool,
    /// Hide vault paths inside keyed document IDs.
    pub use_path_obfuscation: bool,
    /// Resolve conflicts by keeping the newer file without asking.
    pub resolve_conflicts_by_newer_file: bool,
    /// Only check conflicts when a file is opened, not on every pull.
    pub check_conflict_only_on_open: bool,
    /// Maximum chunk size in bytes (0 = default).
    pub custom_chunk_size: usize,
    /// Skip files larger than this many megabytes (0 = unlimited).
    pub sync_max_size_in_mb: u64,
    /// Coalesce local saves into batches before pushing.
    pub batch_save: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            encrypt: false,
            passphrase: String::new(),
            use_dynamic_iteration_count: false,
            use_path_obfuscation: false,
            resolve_conflicts_by_newer_file: false,
            check_conflict_only_on_open: false,
            custom_chunk_size: 0,
            sync_max_size_in_mb: 0,
            batch_save: false,
        }
    }
}

impl SyncSettings {
    /// The size cap in bytes, or `None` when unlimited.
    pub fn max_size_bytes(&self) -> Option<u64> {
        match self.sync_max_size_in_mb {
            0 => None,
            mb => Some(mb * 1024 * 1024),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive() {
        let s = SyncSettings::default();
        assert!(!s.encrypt);
        assert_eq!(s.max_size_bytes(), None);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let s: SyncSettings = serde_json::from_str(r#"{"encrypt":true}"#).unwrap();
        assert!(s.encrypt);
        assert!(!s.use_path_obfuscation);
    }

    #[test]
    fn size_cap_in_bytes() {
        let s = SyncSettings {
            sync_max_size_in_mb: 2,
            ..Default::default()
        };
        assert_eq!(s.max_size_bytes(), Some(2 * 1024 * 1024));
    }
}
