//! Hooks the host application plugs into the database.
//!
//! Rate limiting and key-namespace rules are owned by whatever embeds the
//! engine. The database only asks two questions: may this operation run,
//! and is this key internal.

/// Gate consulted before every public operation.
pub trait RateLimiter: Send {
    /// Consume one token. `false` refuses the operation.
    fn check_and_consume_token(&mut self) -> bool;
}

/// Limiter that never refuses.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn check_and_consume_token(&mut self) -> bool {
        true
    }
}

/// Decides which keys are engine-internal and hidden from scans.
pub trait KeyPolicy: Send {
    /// Whether `key` belongs to a reserved namespace.
    fn is_reserved(&self, key: &str) -> bool;
}

/// Reserves every key starting with one of a fixed set of prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedPrefixes {
    prefixes: Vec<String>,
}

impl ReservedPrefixes {
    /// Prefixes used by the auxiliary structures stored next to user data:
    /// HyperLogLog, Count-Min Sketch, SimHash and token bucket state.
    pub const DEFAULT: [&'static str; 4] = ["hll_", "cms_", "sh_", "tb_"];

    /// Reserve the given prefixes.
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { prefixes: prefixes.into_iter().map(Into::into).collect() }
    }

    /// Reserve nothing.
    pub fn none() -> Self {
        Self { prefixes: Vec::new() }
    }

    /// Reserved prefixes.
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl Default for ReservedPrefixes {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl KeyPolicy for ReservedPrefixes {
    fn is_reserved(&self, key: &str) -> bool {
        self.prefixes.iter().any(|prefix| key.starts_with(prefix.as_str()))
    }
}
