//! Identity cache configuration.

/// Configuration for an `IdentityCache`.
///
/// The execution mode (single-threaded or thread-safe) is not a flag here;
/// it is picked by the cache's store type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether unique non-primary fields are indexed as secondary keys.
    pub unique_caching: bool,
    /// Whether evicting an entry detaches its change token from the instance.
    /// An instance left attached stays tracked and cannot back a new entry.
    pub detach_on_close: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            unique_caching: true,
            detach_on_close: true,
        }
    }
}

impl CacheConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `unique_caching` option (builder pattern).
    #[must_use]
    pub fn unique_caching(mut self, value: bool) -> Self {
        self.unique_caching = value;
        self
    }

    /// Set the `detach_on_close` option (builder pattern).
    #[must_use]
    pub fn detach_on_close(mut self, value: bool) -> Self {
        self.detach_on_close = value;
        self
    }
}
