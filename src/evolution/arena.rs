//! Candidate storage.
//!
//! Payloads are stored once in the arena and referenced everywhere else by
//! [`CandidateId`]. Ids are dense and assigned in creation order, so an id is
//! also the candidate's index.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::schema::{Candidate, CandidateId, CandidateStatus};

#[derive(Debug)]
struct ArenaEntry {
    candidate: Arc<Candidate>,
    status: AtomicU8,
}

/// Append-only store of every candidate ever created.
#[derive(Debug, Default)]
pub struct CandidateArena {
    entries: RwLock<Vec<ArenaEntry>>,
}

impl CandidateArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and store the candidate built for it.
    pub fn insert<F>(&self, build: F) -> Arc<Candidate>
    where
        F: FnOnce(CandidateId) -> Candidate,
    {
        let mut entries = self.entries.write();
        let id = CandidateId(entries.len() as u64);
        let mut candidate = build(id);
        candidate.id = id;
        let candidate = Arc::new(candidate);
        entries.push(ArenaEntry {
            candidate: Arc::clone(&candidate),
            status: AtomicU8::new(CandidateStatus::Candidate.to_u8()),
        });
        candidate
    }

    /// Store a restored candidate with a known status.
    ///
    /// Returns `false` if its id is not the next one in sequence.
    pub(crate) fn restore(&self, candidate: Candidate, status: CandidateStatus) -> bool {
        let mut entries = self.entries.write();
        if candidate.id.0 != entries.len() as u64 {
            return false;
        }
        entries.push(ArenaEntry {
            candidate: Arc::new(candidate),
            status: AtomicU8::new(status.to_u8()),
        });
        true
    }

    pub fn get(&self, id: CandidateId) -> Option<Arc<Candidate>> {
        self.entries
            .read()
            .get(id.0 as usize)
            .map(|entry| Arc::clone(&entry.candidate))
    }

    pub fn status(&self, id: CandidateId) -> Option<CandidateStatus> {
        self.entries
            .read()
            .get(id.0 as usize)
            .map(|entry| CandidateStatus::from_u8(entry.status.load(Ordering::Acquire)))
    }

    /// Update a candidate's status. Callers serialize updates per cell.
    pub(crate) fn set_status(&self, id: CandidateId, status: CandidateStatus) {
        if let Some(entry) = self.entries.read().get(id.0 as usize) {
            entry.status.store(status.to_u8(), Ordering::Release);
        }
    }

    /// Resolve ids to candidates, skipping unknown ids.
    pub fn resolve(&self, ids: &[CandidateId]) -> Vec<Arc<Candidate>> {
        let entries = self.entries.read();
        ids.iter()
            .filter_map(|id| entries.get(id.0 as usize))
            .map(|entry| Arc::clone(&entry.candidate))
            .collect()
    }

    /// Resolve ids, keeping only those with the given status.
    pub fn resolve_with_status(
        &self,
        ids: &[CandidateId],
        status: CandidateStatus,
    ) -> Vec<Arc<Candidate>> {
        let entries = self.entries.read();
        ids.iter()
            .filter_map(|id| entries.get(id.0 as usize))
            .filter(|entry| CandidateStatus::from_u8(entry.status.load(Ordering::Acquire)) == status)
            .map(|entry| Arc::clone(&entry.candidate))
            .collect()
    }

    /// Every candidate with its current status, in id order.
    pub fn snapshot(&self) -> Vec<(Arc<Candidate>, CandidateStatus)> {
        self.entries
            .read()
            .iter()
            .map(|entry| {
                (
                    Arc::clone(&entry.candidate),
                    CandidateStatus::from_u8(entry.status.load(Ordering::Acquire)),
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Append-only log of candidates that failed insertion or were displaced.
///
/// Never pruned; kept as fallback sampling context.
#[derive(Debug, Default)]
pub struct RejectedArchive {
    ids: Mutex<Vec<CandidateId>>,
}

impl RejectedArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: CandidateId) {
        self.ids.lock().push(id);
    }

    /// Archived ids in insertion order.
    pub fn ids(&self) -> Vec<CandidateId> {
        self.ids.lock().clone()
    }

    pub fn contains(&self, id: CandidateId) -> bool {
        self.ids.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FeatureKey;
    use std::collections::{BTreeMap, BTreeSet};

    fn blank(id: CandidateId) -> Candidate {
        Candidate {
            id,
            generation: 0,
            island: 0,
            hypothesis: String::new(),
            code: String::new(),
            analysis: String::new(),
            metrics: BTreeMap::new(),
            tags: BTreeSet::new(),
            score: 0.0,
            features: FeatureKey::Invalid,
            parent: None,
            lineage: None,
        }
    }

    #[test]
    fn test_ids_are_dense() {
        let arena = CandidateArena::new();
        let a = arena.insert(blank);
        let b = arena.insert(blank);
        assert_eq!(a.id, CandidateId(0));
        assert_eq!(b.id, CandidateId(1));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.status(a.id), Some(CandidateStatus::Candidate));
        assert!(arena.get(CandidateId(7)).is_none());
    }

    #[test]
    fn test_status_filtering() {
        let arena = CandidateArena::new();
        let ids: Vec<_> = (0..4).map(|_| arena.insert(blank).id).collect();
        arena.set_status(ids[1], CandidateStatus::Elite);
        arena.set_status(ids[3], CandidateStatus::Elite);
        let elites = arena.resolve_with_status(&ids, CandidateStatus::Elite);
        let elite_ids: Vec<_> = elites.iter().map(|c| c.id).collect();
        assert_eq!(elite_ids, vec![ids[1], ids[3]]);
    }

    #[test]
    fn test_restore_requires_sequence() {
        let arena = CandidateArena::new();
        assert!(arena.restore(blank(CandidateId(0)), CandidateStatus::Elite));
        assert!(!arena.restore(blank(CandidateId(5)), CandidateStatus::Elite));
        assert_eq!(arena.status(CandidateId(0)), Some(CandidateStatus::Elite));
    }

    #[test]
    fn test_rejected_archive_appends() {
        let rejected = RejectedArchive::new();
        rejected.push(CandidateId(2));
        rejected.push(CandidateId(1));
        assert_eq!(rejected.ids(), vec![CandidateId(2), CandidateId(1)]);
        assert!(rejected.contains(CandidateId(1)));
        assert_eq!(rejected.len(), 2);
    }
}
