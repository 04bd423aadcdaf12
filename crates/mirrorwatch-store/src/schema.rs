//! Column families used by the `RocksDB` store.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary endpoint records, keyed by endpoint hash.
    pub const ENDPOINTS: &str = "endpoints";

    /// Index: endpoints by state, keyed by `state || hash`.
    pub const ENDPOINTS_BY_STATE: &str = "endpoints_by_state";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::ENDPOINTS, cf::ENDPOINTS_BY_STATE]
}
