use std::{fmt, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};

/// Live migrations keyed by migration id.
///
/// Generic over the session type so the insert-if-absent semantics can be
/// exercised without a broker.
pub struct MigrationRegistry<S> {
    sessions: DashMap<String, Arc<S>>,
}

impl<S> fmt::Debug for MigrationRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("session_count", &self.sessions.len())
            .finish()
    }
}

impl<S> Default for MigrationRegistry<S> {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

impl<S> MigrationRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session` under `id` unless the id is taken. A rejected
    /// session is handed back so the caller can release its resources.
    pub fn try_insert(&self, id: String, session: S) -> Result<Arc<S>, S> {
        match self.sessions.entry(id) {
            Entry::Occupied(_) => Err(session),
            Entry::Vacant(vacant) => {
                let session = Arc::new(session);
                vacant.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<S>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<S>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn list(&self) -> Vec<Arc<S>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Removes and returns every session.
    pub fn drain(&self) -> Vec<Arc<S>> {
        let ids: Vec<String> =
            self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn duplicate_ids_are_rejected_and_returned() {
        let registry = MigrationRegistry::new();

        assert!(registry.try_insert("m1".to_string(), "first").is_ok());
        let rejected = registry.try_insert("m1".to_string(), "second");

        assert_eq!(rejected.unwrap_err(), "second");
        assert_eq!(registry.get("m1").as_deref(), Some(&"first"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removed_ids_can_be_reused() {
        let registry = MigrationRegistry::new();
        registry.try_insert("m1".to_string(), 1).unwrap();

        assert_eq!(registry.remove("m1").as_deref(), Some(&1));
        assert!(registry.remove("m1").is_none());
        assert!(registry.try_insert("m1".to_string(), 2).is_ok());
    }

    #[test]
    fn drain_empties_the_registry() {
        let registry = MigrationRegistry::new();
        for id in ["a", "b", "c"] {
            registry.try_insert(id.to_string(), id).unwrap();
        }

        let mut drained: Vec<&str> =
            registry.drain().iter().map(|session| **session).collect();
        drained.sort_unstable();

        assert_eq!(drained, ["a", "b", "c"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn racing_inserts_admit_exactly_one_winner() {
        let registry = Arc::new(MigrationRegistry::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|n| {
                let registry = Arc::clone(&registry);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if registry.try_insert("contested".to_string(), n).is_ok() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }
}
