//! Job identifiers.
//!
//! Ids are ULIDs: sortable by creation time and generated without coordination.
//! They render as `job-<ulid>` and parse back from the same form, so a status
//! query arriving as a string can be resolved to a [`JobId`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

const PREFIX: &str = "job-";

/// Identifier of a Job (submit/status unit).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Ulid);

impl JobId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for JobId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PREFIX, self.0)
    }
}

/// Error returned when a string is not a valid job id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job id: {0}")]
pub struct ParseJobIdError(String);

impl FromStr for JobId {
    type Err = ParseJobIdError;

    /// Accepts both `job-<ulid>` and a bare ULID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw)
            .map(JobId::from_ulid)
            .map_err(|_| ParseJobIdError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix() {
        let ulid = Ulid::new();
        let id = JobId::from_ulid(ulid);
        assert_eq!(id.to_string(), format!("job-{ulid}"));
    }

    #[test]
    fn parses_what_it_displays() {
        let id = JobId::from_ulid(Ulid::new());
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);

        let bare: JobId = id.as_ulid().to_string().parse().unwrap();
        assert_eq!(bare, id);
    }

    #[test]
    fn rejects_garbage() {
        let err = "job-not-a-ulid".parse::<JobId>().unwrap_err();
        assert!(err.to_string().contains("job-not-a-ulid"));
    }

    #[test]
    fn ids_are_sortable_by_creation() {
        let id1 = JobId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = JobId::from_ulid(Ulid::new());
        assert!(id1 < id2);
    }

    #[test]
    fn ids_can_be_serialized() {
        let job_id = JobId::from_ulid(Ulid::new());
        let serialized = serde_json::to_string(&job_id).unwrap();
        let deserialized: JobId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(job_id, deserialized);
    }
}
