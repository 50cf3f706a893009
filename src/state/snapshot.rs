//! Versioned binary snapshot format: one version byte followed by
//! length-delimited protobuf entries.

use chrono::{DateTime, Utc};
use prost::Message;

use super::StateError;

pub(crate) const SNAPSHOT_VERSION: u8 = 1;

#[derive(Clone, PartialEq, Message)]
pub(crate) struct MatcherEntry {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
    #[prost(bool, tag = "3")]
    pub is_regex: bool,
    #[prost(bool, tag = "4")]
    pub is_equal: bool,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct SilenceEntry {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, repeated, tag = "2")]
    pub matchers: Vec<MatcherEntry>,
    #[prost(int64, tag = "3")]
    pub starts_at_ms: i64,
    #[prost(int64, tag = "4")]
    pub ends_at_ms: i64,
    #[prost(int64, tag = "5")]
    pub updated_at_ms: i64,
    #[prost(string, tag = "6")]
    pub created_by: String,
    #[prost(string, tag = "7")]
    pub comment: String,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct NotificationEntry {
    #[prost(string, tag = "1")]
    pub group_key: String,
    #[prost(string, tag = "2")]
    pub receiver: String,
    #[prost(uint32, tag = "3")]
    pub integration_index: u32,
    #[prost(int64, tag = "4")]
    pub timestamp_ms: i64,
    #[prost(uint64, repeated, tag = "5")]
    pub firing_alerts: Vec<u64>,
    #[prost(uint64, repeated, tag = "6")]
    pub resolved_alerts: Vec<u64>,
}

pub(crate) fn encode<'a, M: Message + 'a>(entries: impl IntoIterator<Item = &'a M>) -> Vec<u8> {
    let mut out = vec![SNAPSHOT_VERSION];
    for entry in entries {
        out.extend(entry.encode_length_delimited_to_vec());
    }
    out
}

/// Decodes a snapshot. An empty input is an empty state.
pub(crate) fn decode<M: Message + Default>(bytes: &[u8]) -> Result<Vec<M>, StateError> {
    let Some((&version, mut buf)) = bytes.split_first() else {
        return Ok(Vec::new());
    };
    if version != SNAPSHOT_VERSION {
        return Err(StateError::UnsupportedVersion(version));
    }
    let mut entries = Vec::new();
    while !buf.is_empty() {
        entries.push(M::decode_length_delimited(&mut buf)?);
    }
    Ok(entries)
}

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_empty_state() {
        assert!(decode::<SilenceEntry>(&[]).unwrap().is_empty());
        assert!(decode::<SilenceEntry>(&[SNAPSHOT_VERSION]).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        assert!(matches!(decode::<SilenceEntry>(&[9, 0]), Err(StateError::UnsupportedVersion(9))));
    }

    #[test]
    fn test_truncated_input_is_rejected() {
        let entry = NotificationEntry { group_key: "g".into(), ..Default::default() };
        let mut bytes = encode([&entry]);
        bytes.pop();
        assert!(matches!(decode::<NotificationEntry>(&bytes), Err(StateError::Decode(_))));
    }
}
