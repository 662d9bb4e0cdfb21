//! volscan core: domain types, indicators, the feature engine, the pattern
//! classifier, historical spike detection and bar stores.
//!
//! Data flows one way: a `BarStore` reader yields a `Series`, the feature
//! engine turns it into a `FeatureSeries`, and the `PatternClassifier`
//! returns a `Verdict`. Nothing here knows about worker pools or sinks.

pub mod data;
pub mod domain;
pub mod features;
pub mod indicators;
pub mod screen;
pub mod spikes;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything handed across scan worker threads is
    /// Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Series>();
        require_sync::<domain::Series>();
        require_send::<features::FeatureSeries>();
        require_sync::<features::FeatureSeries>();
        require_send::<screen::PatternClassifier>();
        require_sync::<screen::PatternClassifier>();
        require_send::<screen::ScreenResult>();
        require_send::<screen::RejectReason>();

        require_send::<data::SqliteStore>();
        require_sync::<data::SqliteStore>();
        require_send::<data::ParquetStore>();
        require_sync::<data::ParquetStore>();
        require_send::<data::MemoryStore>();
        require_sync::<data::MemoryStore>();
    }

    /// Stores are usable as trait objects shared across threads.
    #[test]
    fn bar_store_is_object_safe() {
        use data::BarStore;

        fn shared(store: &dyn BarStore) -> &dyn BarStore {
            store
        }
        let store = data::MemoryStore::new();
        assert_eq!(shared(&store).kind(), "memory");
    }
}
