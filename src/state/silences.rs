//! The silence store of one org.

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{
    MaintainedState, StateError,
    snapshot::{self, MatcherEntry, SilenceEntry, from_millis, to_millis},
};
use crate::models::{
    LabelSet, Matcher,
    silence::{PostableSilence, Silence, SilenceMatcher, SilenceState},
};

/// In-memory silences, keyed by id.
#[derive(Default)]
pub struct Silences {
    entries: DashMap<String, Silence>,
}

impl Silences {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every entry of the snapshot at `path`. A missing file is an empty
    /// snapshot. Entries are never filtered on load.
    pub async fn load_snapshot(&self, path: &Path) -> Result<usize, StateError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let decoded: Vec<SilenceEntry> = snapshot::decode(&bytes)?;
        let count = decoded.len();
        for entry in decoded {
            let silence = silence_from_entry(entry);
            self.entries.insert(silence.id.clone(), silence);
        }
        Ok(count)
    }

    /// Creates a silence, or updates it when `id` names an existing one.
    pub fn set(&self, postable: PostableSilence, now: DateTime<Utc>) -> Result<String, StateError> {
        if postable.matchers.is_empty() {
            return Err(StateError::InvalidSilence("at least one matcher required".into()));
        }
        for m in &postable.matchers {
            m.compile().map_err(|e| StateError::InvalidSilence(e.to_string()))?;
        }
        if postable.ends_at <= postable.starts_at {
            return Err(StateError::InvalidSilence("end time must be after start time".into()));
        }
        if postable.ends_at <= now {
            return Err(StateError::InvalidSilence("end time can't be in the past".into()));
        }

        let id = match postable.id.filter(|id| !id.is_empty()) {
            Some(id) => {
                let existing = self
                    .entries
                    .get(&id)
                    .ok_or_else(|| StateError::SilenceNotFound(id.clone()))?;
                if existing.state_at(now) == SilenceState::Expired {
                    return Err(StateError::SilenceExpired(id));
                }
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let silence = Silence {
            id: id.clone(),
            matchers: postable.matchers,
            starts_at: postable.starts_at,
            ends_at: postable.ends_at,
            updated_at: now,
            created_by: postable.created_by,
            comment: postable.comment,
        };
        self.entries.insert(id.clone(), silence);
        Ok(id)
    }

    /// Ends the silence at `now`.
    pub fn expire(&self, id: &str, now: DateTime<Utc>) -> Result<(), StateError> {
        let mut silence =
            self.entries.get_mut(id).ok_or_else(|| StateError::SilenceNotFound(id.to_string()))?;
        match silence.state_at(now) {
            SilenceState::Expired => return Err(StateError::SilenceExpired(id.to_string())),
            SilenceState::Pending => silence.starts_at = now,
            SilenceState::Active => {}
        }
        silence.ends_at = now;
        silence.updated_at = now;
        Ok(())
    }

    /// The silence `id`, if stored.
    pub fn get(&self, id: &str) -> Option<Silence> {
        self.entries.get(id).map(|s| s.clone())
    }

    /// All silences, oldest start first.
    pub fn list(&self) -> Vec<Silence> {
        let mut all: Vec<Silence> = self.entries.iter().map(|s| s.clone()).collect();
        all.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Ids of the active silences that match `labels`.
    pub fn mutes(&self, labels: &LabelSet, now: DateTime<Utc>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|s| s.state_at(now) == SilenceState::Active)
            .filter(|s| {
                s.matchers.iter().all(|m| m.compile().is_ok_and(|c: Matcher| c.matches_labels(labels)))
            })
            .map(|s| s.id.clone())
            .collect()
    }

    /// Number of silences.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no silence is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MaintainedState for Silences {
    fn gc(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.entries.len();
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        self.entries.retain(|_, s| s.ends_at.checked_add_signed(retention).is_none_or(|t| t > now));
        before - self.entries.len()
    }

    fn marshal_binary(&self) -> Vec<u8> {
        let mut entries: Vec<SilenceEntry> =
            self.entries.iter().map(|s| entry_from_silence(&s)).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot::encode(&entries)
    }
}

fn entry_from_silence(s: &Silence) -> SilenceEntry {
    SilenceEntry {
        id: s.id.clone(),
        matchers: s
            .matchers
            .iter()
            .map(|m| MatcherEntry {
                name: m.name.clone(),
                value: m.value.clone(),
                is_regex: m.is_regex,
                is_equal: m.is_equal,
            })
            .collect(),
        starts_at_ms: to_millis(s.starts_at),
        ends_at_ms: to_millis(s.ends_at),
        updated_at_ms: to_millis(s.updated_at),
        created_by: s.created_by.clone(),
        comment: s.comment.clone(),
    }
}

fn silence_from_entry(e: SilenceEntry) -> Silence {
    Silence {
        id: e.id,
        matchers: e
            .matchers
            .into_iter()
            .map(|m| SilenceMatcher {
                name: m.name,
                value: m.value,
                is_regex: m.is_regex,
                is_equal: m.is_equal,
            })
            .collect(),
        starts_at: from_millis(e.starts_at_ms),
        ends_at: from_millis(e.ends_at_ms),
        updated_at: from_millis(e.updated_at_ms),
        created_by: e.created_by,
        comment: e.comment,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    fn matcher(name: &str, value: &str) -> SilenceMatcher {
        SilenceMatcher { name: name.into(), value: value.into(), is_regex: false, is_equal: true }
    }

    fn postable(starts: DateTime<Utc>, ends: DateTime<Utc>) -> PostableSilence {
        PostableSilence {
            id: None,
            matchers: vec![matcher("alertname", "Cpu")],
            starts_at: starts,
            ends_at: ends,
            created_by: "tester".into(),
            comment: "maintenance".into(),
        }
    }

    #[test]
    fn test_set_and_mute() {
        let silences = Silences::new();
        let now = Utc::now();
        let id = silences.set(postable(now, now + ChronoDuration::hours(1)), now).unwrap();

        let labels: LabelSet = [("alertname".to_string(), "Cpu".to_string())].into();
        assert_eq!(silences.mutes(&labels, now), vec![id.clone()]);

        let other: LabelSet = [("alertname".to_string(), "Disk".to_string())].into();
        assert!(silences.mutes(&other, now).is_empty());

        silences.expire(&id, now).unwrap();
        assert!(silences.mutes(&labels, now).is_empty());
        assert!(matches!(silences.expire(&id, now), Err(StateError::SilenceExpired(_))));
    }

    #[test]
    fn test_set_validates_input() {
        let silences = Silences::new();
        let now = Utc::now();

        let mut no_matchers = postable(now, now + ChronoDuration::hours(1));
        no_matchers.matchers.clear();
        assert!(silences.set(no_matchers, now).is_err());

        assert!(silences.set(postable(now, now - ChronoDuration::hours(1)), now).is_err());

        let past = postable(now - ChronoDuration::hours(2), now - ChronoDuration::hours(1));
        assert!(silences.set(past, now).is_err());

        let mut unknown = postable(now, now + ChronoDuration::hours(1));
        unknown.id = Some("missing".into());
        assert!(matches!(silences.set(unknown, now), Err(StateError::SilenceNotFound(_))));
    }

    #[test]
    fn test_update_keeps_id() {
        let silences = Silences::new();
        let now = Utc::now();
        let id = silences.set(postable(now, now + ChronoDuration::hours(1)), now).unwrap();

        let mut update = postable(now, now + ChronoDuration::hours(3));
        update.id = Some(id.clone());
        assert_eq!(silences.set(update, now).unwrap(), id);
        assert_eq!(silences.len(), 1);
        assert_eq!(silences.get(&id).unwrap().ends_at, now + ChronoDuration::hours(3));
    }

    #[test]
    fn test_gc_drops_only_entries_past_retention() {
        let silences = Silences::new();
        let now = Utc::now();
        let start = now - ChronoDuration::days(10);
        let old = silences.set(postable(start, now + ChronoDuration::minutes(1)), start).unwrap();
        let young = silences.set(postable(start, now + ChronoDuration::minutes(1)), start).unwrap();
        silences.entries.get_mut(&old).unwrap().ends_at = now - ChronoDuration::days(6);
        silences.entries.get_mut(&young).unwrap().ends_at = now - ChronoDuration::days(1);

        let removed = silences.gc(now, Duration::from_secs(5 * 24 * 3600));
        assert_eq!(removed, 1);
        assert!(silences.get(&old).is_none());
        assert!(silences.get(&young).is_some());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_keeps_expired_entries() {
        let silences = Silences::new();
        let now = Utc::now();
        let id = silences.set(postable(now, now + ChronoDuration::hours(1)), now).unwrap();
        silences.expire(&id, now).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silences");
        tokio::fs::write(&path, silences.marshal_binary()).await.unwrap();

        let restored = Silences::new();
        assert_eq!(restored.load_snapshot(&path).await.unwrap(), 1);
        let silence = restored.get(&id).unwrap();
        assert_eq!(silence.created_by, "tester");
        assert_eq!(silence.matchers, vec![matcher("alertname", "Cpu")]);
        assert_eq!(restored.marshal_binary(), silences.marshal_binary());
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let silences = Silences::new();
        assert_eq!(silences.load_snapshot(&dir.path().join("nope")).await.unwrap(), 0);
        assert!(silences.is_empty());
    }
}
