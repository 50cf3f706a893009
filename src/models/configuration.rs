//! Saved configuration records and the commands that write them.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Version tag stored with every saved configuration.
pub const CONFIGURATION_VERSION: &str = "v1";

/// Lowercase hex MD5 of the raw configuration bytes.
pub fn configuration_hash(raw: &[u8]) -> String {
    format!("{:x}", md5::compute(raw))
}

/// One saved configuration version of an org.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertConfiguration {
    /// Row id.
    pub id: i64,
    /// Owning org.
    pub org_id: i64,
    /// Raw configuration document.
    pub alertmanager_configuration: String,
    /// MD5 of the raw document.
    pub configuration_hash: String,
    /// Version of the document format.
    pub configuration_version: String,
    /// Whether this is the default configuration.
    pub is_default: bool,
    /// When the row was saved.
    pub created_at: DateTime<Utc>,
    /// When the row was last applied, if ever.
    pub last_applied: Option<DateTime<Utc>>,
    /// Whether this is the org's applied configuration.
    pub applied: bool,
}

/// Inserts a new configuration version.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveAlertmanagerConfigurationCmd {
    /// Owning org.
    pub org_id: i64,
    /// Raw configuration document.
    pub alertmanager_configuration: String,
    /// MD5 of the raw document.
    pub configuration_hash: String,
    /// Version of the document format.
    pub configuration_version: String,
    /// Whether this is the default configuration.
    pub is_default: bool,
}

impl SaveAlertmanagerConfigurationCmd {
    /// Builds the command for `raw`, computing its hash.
    pub fn new(org_id: i64, raw: &[u8], is_default: bool) -> Self {
        Self {
            org_id,
            alertmanager_configuration: String::from_utf8_lossy(raw).into_owned(),
            configuration_hash: configuration_hash(raw),
            configuration_version: CONFIGURATION_VERSION.to_string(),
            is_default,
        }
    }
}

/// Marks the latest version with the given hash as the applied one.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkConfigurationAsAppliedCmd {
    /// Owning org.
    pub org_id: i64,
    /// Hash of the version to mark.
    pub configuration_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_hash_is_md5_hex() {
        assert_eq!(configuration_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(configuration_hash(b"{}"), configuration_hash(b"{}"));
        assert_ne!(configuration_hash(b"{}"), configuration_hash(b"{ }"));
    }

    #[test]
    fn test_save_cmd_hashes_raw_bytes() {
        let cmd = SaveAlertmanagerConfigurationCmd::new(3, b"{\"a\":1}", true);
        assert_eq!(cmd.org_id, 3);
        assert_eq!(cmd.configuration_hash, configuration_hash(b"{\"a\":1}"));
        assert_eq!(cmd.configuration_version, "v1");
        assert!(cmd.is_default);
    }
}
