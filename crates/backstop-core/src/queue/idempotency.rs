//! IdempotencyIndex - idempotency key -> job id.
//!
//! Mappings are never removed for the life of the process.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::JobId;

/// Outcome of claiming a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The key was already mapped; nothing was created.
    Existing(JobId),
    /// The key was free and now maps to a freshly created job.
    Created(JobId),
}

impl Claim {
    pub fn job_id(&self) -> JobId {
        match self {
            Claim::Existing(id) | Claim::Created(id) => *id,
        }
    }
}

#[derive(Default)]
pub struct IdempotencyIndex {
    keys: DashMap<String, JobId>,
}

impl IdempotencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &str) -> Option<JobId> {
        self.keys.get(key).map(|entry| *entry.value())
    }

    /// Insert-if-absent. `create` runs only when the key is free, while the
    /// key's shard is locked, so concurrent claims of one key create exactly
    /// one job. `create` must not touch this index.
    pub fn claim_with<F>(&self, key: &str, create: F) -> Claim
    where
        F: FnOnce() -> JobId,
    {
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(entry) => Claim::Existing(*entry.get()),
            Entry::Vacant(entry) => {
                let job_id = create();
                entry.insert(job_id);
                Claim::Created(job_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ulid::Ulid;

    #[test]
    fn second_claim_returns_existing() {
        let index = IdempotencyIndex::new();
        let first = JobId::from_ulid(Ulid::new());

        assert_eq!(index.claim_with("k1", || first), Claim::Created(first));
        let second = index.claim_with("k1", || panic!("must not create twice"));
        assert_eq!(second, Claim::Existing(first));
        assert_eq!(index.lookup("k1"), Some(first));
        assert_eq!(index.lookup("k2"), None);
    }

    #[test]
    fn concurrent_claims_create_once() {
        let index = Arc::new(IdempotencyIndex::new());
        let created = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let index = Arc::clone(&index);
                let created = Arc::clone(&created);
                std::thread::spawn(move || {
                    index
                        .claim_with("shared", || {
                            created.fetch_add(1, Ordering::SeqCst);
                            JobId::from_ulid(Ulid::new())
                        })
                        .job_id()
                })
            })
            .collect();

        let ids: Vec<JobId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(index.lookup("shared"), Some(ids[0]));
    }
}
