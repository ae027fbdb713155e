//! Cache key derivation.
//!
//! A key is the resource name followed by each rendered call argument, all
//! joined with a separator: `("user", (1,))` becomes `user_1`.
//!
//! Arguments are rendered through `serde_json::Value`:
//!
//! - `()` (or any value serializing to `null`) contributes no parts
//! - a sequence or tuple contributes one part per element
//! - anything else contributes a single part
//!
//! Each part renders strings verbatim, numbers and booleans in display form,
//! `null` as the empty string, nested sequences as their items joined by `,`,
//! and maps as compact JSON.
//!
//! Keys compare by exact string equality. Two argument lists that render to
//! the same string (for example `("a_b",)` and `("a", "b")`) share a key; this
//! is accepted rather than escaped so keys stay readable and predictable for
//! `clear_cache` callers.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{DEFAULT_KEY_SEPARATOR, LIST_ITEM_SEPARATOR};
use crate::error::Result;

/// String identifying one resource-plus-arguments combination.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps an already-derived key string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Derives the key for `name` called with `args`, using the default separator.
    pub fn derive<A>(name: &str, args: &A) -> Result<Self>
    where
        A: Serialize + ?Sized,
    {
        Self::derive_with(name, args, DEFAULT_KEY_SEPARATOR)
    }

    /// Derives the key for `name` called with `args`, joined by `separator`.
    pub fn derive_with<A>(name: &str, args: &A, separator: &str) -> Result<Self>
    where
        A: Serialize + ?Sized,
    {
        let mut parts = vec![name.to_string()];
        parts.extend(render_args(args)?);
        Ok(Self(parts.join(separator)))
    }

    /// Derives a key from arguments alone, using the default separator.
    ///
    /// Callers pass the resource name as the first argument:
    /// `CacheKey::from_args(&("user", 1))` equals `CacheKey::derive("user", &(1,))`.
    pub fn from_args<A>(args: &A) -> Result<Self>
    where
        A: Serialize + ?Sized,
    {
        Self::from_args_with(args, DEFAULT_KEY_SEPARATOR)
    }

    /// Derives a key from arguments alone, joined by `separator`.
    pub fn from_args_with<A>(args: &A, separator: &str) -> Result<Self>
    where
        A: Serialize + ?Sized,
    {
        Ok(Self(render_args(args)?.join(separator)))
    }

    /// Returns true if this key belongs to the resource `name`.
    pub fn belongs_to(&self, name: &str, separator: &str) -> bool {
        match self.0.strip_prefix(name) {
            Some("") => true,
            Some(rest) => rest.starts_with(separator),
            None => false,
        }
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key, returning the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for CacheKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

fn render_args<A>(args: &A) -> Result<Vec<String>>
where
    A: Serialize + ?Sized,
{
    let parts = match serde_json::to_value(args)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(render_part).collect(),
        other => vec![render_part(&other)],
    };
    Ok(parts)
}

fn render_part(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_part)
            .collect::<Vec<_>>()
            .join(LIST_ITEM_SEPARATOR),
        Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(json!(null), "user" ; "no arguments")]
    #[test_case(json!([1]), "user_1" ; "single number")]
    #[test_case(json!(42), "user_42" ; "bare scalar")]
    #[test_case(json!(["alice", true]), "user_alice_true" ; "string and bool")]
    #[test_case(json!([null, 7]), "user__7" ; "null renders empty")]
    #[test_case(json!([[1, 2, 3]]), "user_1,2,3" ; "nested list")]
    #[test_case(json!([{"id": 1}]), "user_{\"id\":1}" ; "object as json")]
    fn test_derive_rendering(args: Value, expected: &str) {
        let key = CacheKey::derive("user", &args).unwrap();
        assert_eq!(key.as_str(), expected);
    }

    #[test]
    fn test_derive_from_tuples() {
        assert_eq!(CacheKey::derive("user", &(1,)).unwrap().as_str(), "user_1");
        assert_eq!(CacheKey::derive("user", &()).unwrap().as_str(), "user");
        assert_eq!(
            CacheKey::derive("posts", &("alice", 2u8)).unwrap().as_str(),
            "posts_alice_2"
        );
    }

    #[test]
    fn test_from_args_matches_derive() {
        let derived = CacheKey::derive("user", &(1,)).unwrap();
        let cleared = CacheKey::from_args(&("user", 1)).unwrap();
        assert_eq!(derived, cleared);
    }

    #[test]
    fn test_custom_separator() {
        let key = CacheKey::derive_with("user", &(1, 2), ":").unwrap();
        assert_eq!(key.as_str(), "user:1:2");
    }

    #[test]
    fn test_join_collision_is_shared_key() {
        let a = CacheKey::derive("user", &("a_b",)).unwrap();
        let b = CacheKey::derive("user", &("a", "b")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_belongs_to() {
        let key = CacheKey::new("user_1");
        assert!(key.belongs_to("user", "_"));
        assert!(CacheKey::new("user").belongs_to("user", "_"));
        assert!(!CacheKey::new("username_1").belongs_to("user", "_"));
        assert!(!key.belongs_to("posts", "_"));
    }

    #[test]
    fn test_borrow_lookup() {
        let mut map = std::collections::HashMap::new();
        map.insert(CacheKey::new("user_1"), 1);
        assert_eq!(map.get("user_1"), Some(&1));
    }

    proptest! {
        #[test]
        fn prop_derive_is_deterministic(name in "[a-z]{1,8}", id in any::<u64>(), tag in "[a-z0-9]{0,6}") {
            let first = CacheKey::derive(&name, &(id, &tag)).unwrap();
            let second = CacheKey::derive(&name, &(id, &tag)).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert!(first.belongs_to(&name, DEFAULT_KEY_SEPARATOR));
        }

        #[test]
        fn prop_distinct_names_do_not_collide(id in any::<u32>()) {
            let user = CacheKey::derive("user", &(id,)).unwrap();
            let post = CacheKey::derive("post", &(id,)).unwrap();
            prop_assert_ne!(user, post);
        }
    }
}
