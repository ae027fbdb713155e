//! Constants shared across the stash crates.

// ═══════════════════════════════════════════════════════════════════════════════
// KEY DERIVATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Separator placed between the resource name and each rendered argument.
pub const DEFAULT_KEY_SEPARATOR: &str = "_";

/// Separator used when a single argument is itself a list.
pub const LIST_ITEM_SEPARATOR: &str = ",";

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE SIZING
// ═══════════════════════════════════════════════════════════════════════════════

/// Number of entries the cache map preallocates.
pub const DEFAULT_INITIAL_CAPACITY: usize = 64;

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Overrides the key separator of a store built with `StoreConfig::from_env`.
pub const ENV_KEY_SEPARATOR: &str = "STASH_KEY_SEPARATOR";

/// Overrides the preallocated cache capacity.
pub const ENV_INITIAL_CAPACITY: &str = "STASH_INITIAL_CAPACITY";
