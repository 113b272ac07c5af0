use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Per-file reading progress.
///
/// Stored as lowercase text. `normalize` is the only lenient parser: anything
/// it does not recognize collapses to `Unread`, so values written by a newer
/// or older build never make a row unreadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ReadingState {
    #[default]
    Unread,
    Reading,
    Read,
}

impl ReadingState {
    pub const ALL: [ReadingState; 3] = [ReadingState::Unread, ReadingState::Reading, ReadingState::Read];

    pub fn normalize(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "reading" => ReadingState::Reading,
            "read" => ReadingState::Read,
            _ => ReadingState::Unread,
        }
    }

    /// Normalize a nullable column value.
    pub fn from_stored(value: Option<&str>) -> Self {
        value.map(Self::normalize).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingState::Unread => "unread",
            ReadingState::Reading => "reading",
            ReadingState::Read => "read",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReadingState::Unread => "Unread",
            ReadingState::Reading => "Reading",
            ReadingState::Read => "Read",
        }
    }

    /// unread -> reading -> read -> unread
    pub fn next(self) -> Self {
        match self {
            ReadingState::Unread => ReadingState::Reading,
            ReadingState::Reading => ReadingState::Read,
            ReadingState::Read => ReadingState::Unread,
        }
    }
}

impl fmt::Display for ReadingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ReadingState {
    fn from(value: &str) -> Self {
        ReadingState::normalize(value)
    }
}

impl From<String> for ReadingState {
    fn from(value: String) -> Self {
        ReadingState::normalize(&value)
    }
}

/// One row of the `metadata` table.
///
/// `path` is the canonical absolute path of the file at its last known
/// location and the only link between the file and its record. Empty strings
/// mean "unset" for every bibliographic field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub path: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub published: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub doi: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub to_read: bool,
    #[serde(default)]
    pub reading_state: ReadingState,
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_opened_at: Option<DateTime<Utc>>,
}

impl MetadataRecord {
    /// A fresh record with every field at its default.
    pub fn new(path: impl Into<String>) -> Self {
        MetadataRecord {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Comma-separated `tag` split into trimmed, non-empty entries.
    pub fn tags(&self) -> Vec<&str> {
        self.tag
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Seconds since the epoch, 0 for unset.
pub(crate) fn to_unix(ts: Option<DateTime<Utc>>) -> i64 {
    ts.map(|t| t.timestamp()).unwrap_or(0)
}

pub(crate) fn from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
    match secs {
        Some(s) if s > 0 => DateTime::from_timestamp(s, 0),
        _ => None,
    }
}

/// PDF and EPUB files, matched case-insensitively.
pub fn is_document_file(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.eq_ignore_ascii_case("pdf") || ext.eq_ignore_ascii_case("epub"),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_known_values() {
        assert_eq!(ReadingState::normalize("reading"), ReadingState::Reading);
        assert_eq!(ReadingState::normalize(" Read "), ReadingState::Read);
        assert_eq!(ReadingState::normalize("unread"), ReadingState::Unread);
    }

    #[test]
    fn test_normalize_collapses_unknown_to_unread() {
        for raw in ["", "bogus", "UNREAD", "finished", "   "] {
            assert_eq!(ReadingState::normalize(raw), ReadingState::Unread, "{raw:?}");
        }
        assert_eq!(ReadingState::from_stored(None), ReadingState::Unread);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["", "bogus", "READING", "read", "Unread", "r e a d"] {
            let once = ReadingState::normalize(raw);
            let twice = ReadingState::normalize(once.as_str());
            assert_eq!(once, twice, "{raw:?}");
        }
    }

    #[test]
    fn test_next_cycles_through_all_states() {
        let mut state = ReadingState::Unread;
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(state);
            state = state.next();
        }
        assert_eq!(seen, ReadingState::ALL.to_vec());
        assert_eq!(state, ReadingState::Unread);
    }

    #[test]
    fn test_deserialize_is_lenient() {
        let state: ReadingState = serde_json::from_str("\"garbage\"").unwrap();
        assert_eq!(state, ReadingState::Unread);
        let state: ReadingState = serde_json::from_str("\"READ\"").unwrap();
        assert_eq!(state, ReadingState::Read);
        assert_eq!(serde_json::to_string(&ReadingState::Reading).unwrap(), "\"reading\"");
    }

    #[test]
    fn test_tags_split() {
        let mut record = MetadataRecord::new("/lib/a.pdf");
        record.tag = "ml, , optimization ,theory".into();
        assert_eq!(record.tags(), vec!["ml", "optimization", "theory"]);
    }

    #[test]
    fn test_unix_conversion_treats_zero_as_unset() {
        assert_eq!(from_unix(Some(0)), None);
        assert_eq!(from_unix(None), None);
        let ts = from_unix(Some(1000)).unwrap();
        assert_eq!(to_unix(Some(ts)), 1000);
        assert_eq!(to_unix(None), 0);
    }
}
