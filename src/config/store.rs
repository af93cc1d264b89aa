//! Atomically swapped configuration snapshot.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::AuditConfig;

/// Holds the active [`AuditConfig`] snapshot.
///
/// Readers load the `Arc` without taking a lock, then work on their own
/// snapshot for the rest of the operation. An update swaps the whole
/// snapshot, so no reader can observe a mix of old and new fields and no
/// reader waits on a writer.
#[derive(Debug)]
pub struct ConfigStore {
    current: ArcSwap<AuditConfig>,
}

impl ConfigStore {
    /// Creates a store holding `config`.
    pub fn new(config: AuditConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
        }
    }

    /// Returns the active snapshot.
    pub fn current(&self) -> Arc<AuditConfig> {
        self.current.load_full()
    }

    /// Installs a new snapshot and returns the one it replaced.
    ///
    /// Readers that already captured the old snapshot keep using it.
    /// Callers serialize updates themselves.
    pub fn update(&self, config: AuditConfig) -> Arc<AuditConfig> {
        self.current.swap(Arc::new(config))
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(AuditConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditSettings;

    fn config_with_index(index: &str) -> AuditConfig {
        let mut settings = AuditSettings::default();
        settings.compliance.write_watched_indices = vec![index.to_string()];
        AuditConfig::compile(settings).unwrap()
    }

    #[test]
    fn update_returns_previous_snapshot() {
        let store = ConfigStore::new(config_with_index("emp"));
        let old = store.update(config_with_index("finance"));

        assert!(old.compliance().is_write_watched("emp"));
        assert!(store.current().compliance().is_write_watched("finance"));
        assert!(!store.current().compliance().is_write_watched("emp"));
    }

    #[test]
    fn captured_snapshot_survives_update() {
        let store = ConfigStore::new(config_with_index("emp"));
        let captured = store.current();

        store.update(config_with_index("finance"));

        assert!(captured.compliance().is_write_watched("emp"));
        assert!(!captured.compliance().is_write_watched("finance"));
    }

    #[test]
    fn concurrent_readers_see_whole_snapshots() {
        let store = Arc::new(ConfigStore::new(config_with_index("a")));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = store.current();
                        let a = snap.compliance().is_write_watched("a");
                        let b = snap.compliance().is_write_watched("b");
                        assert!(a ^ b, "snapshot must watch exactly one of a/b");
                    }
                })
            })
            .collect();

        for i in 0..200 {
            store.update(config_with_index(if i % 2 == 0 { "b" } else { "a" }));
        }

        for r in readers {
            r.join().unwrap();
        }
    }
}
