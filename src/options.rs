//! Type-indexed per-request options.
//!
//! Features such as retries, redirection handling or deduplication attach their
//! configuration to a request through an option kind: a marker type
//! implementing [`HttpOption`] that names the value type and its default. The
//! request type itself never needs to know about them.
//!
//! # Examples
//!
//! ```
//! use loadchain::options::{HttpOption, HttpOptions};
//!
//! struct Priority;
//!
//! impl HttpOption for Priority {
//!     type Value = u8;
//!
//!     fn default_value() -> u8 {
//!         5
//!     }
//! }
//!
//! let mut options = HttpOptions::new();
//! assert_eq!(options.get::<Priority>(), 5);
//!
//! options.set::<Priority>(9);
//! assert_eq!(options.get::<Priority>(), 9);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An option kind: a marker type naming a value type and its default.
pub trait HttpOption: 'static {
    /// The type stored for this option.
    type Value: Clone + Send + Sync + 'static;

    /// The value returned when the option was never set.
    fn default_value() -> Self::Value;
}

/// A type-indexed bag of option values.
///
/// Reads never fail: an option that was never set yields its kind's default.
#[derive(Clone, Default)]
pub struct HttpOptions {
    storage: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl HttpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored value for `O`, or `O::default_value()`.
    pub fn get<O: HttpOption>(&self) -> O::Value {
        self.storage
            .get(&TypeId::of::<O>())
            .and_then(|value| value.downcast_ref::<O::Value>())
            .cloned()
            .unwrap_or_else(O::default_value)
    }

    /// Overrides the value for `O`.
    pub fn set<O: HttpOption>(&mut self, value: O::Value) {
        self.storage.insert(TypeId::of::<O>(), Arc::new(value));
    }

    /// Restores the default for `O`.
    pub fn remove<O: HttpOption>(&mut self) {
        self.storage.remove(&TypeId::of::<O>());
    }

    /// Returns `true` if `O` was explicitly set.
    pub fn contains<O: HttpOption>(&self) -> bool {
        self.storage.contains_key(&TypeId::of::<O>())
    }
}

impl fmt::Debug for HttpOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpOptions")
            .field("count", &self.storage.len())
            .finish()
    }
}

/// Identifier shared by requests that should be deduplicated.
///
/// Read by [`DeduplicatingLoader`](crate::loaders::DeduplicatingLoader).
/// Defaults to `None`: the request is never deduplicated.
pub enum DeduplicationIdentifier {}

impl HttpOption for DeduplicationIdentifier {
    type Value = Option<String>;

    fn default_value() -> Self::Value {
        None
    }
}

/// Whether a request counts against a [`ThrottledLoader`](crate::loaders::ThrottledLoader).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottleBehavior {
    #[default]
    Throttled,
    Unthrottled,
}

pub enum ThrottleOption {}

impl HttpOption for ThrottleOption {
    type Value = ThrottleBehavior;

    fn default_value() -> Self::Value {
        ThrottleBehavior::Throttled
    }
}

/// URL scheme used when the request is converted for the transport.
///
/// Defaults to `https`.
pub enum SchemeOption {}

impl HttpOption for SchemeOption {
    type Value = &'static str;

    fn default_value() -> Self::Value {
        "https"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_option_reads_default() {
        let options = HttpOptions::new();
        assert_eq!(options.get::<DeduplicationIdentifier>(), None);
        assert_eq!(options.get::<ThrottleOption>(), ThrottleBehavior::Throttled);
        assert_eq!(options.get::<SchemeOption>(), "https");
    }

    #[test]
    fn test_options_are_independent() {
        let mut options = HttpOptions::new();
        options.set::<DeduplicationIdentifier>(Some("users".to_string()));

        assert_eq!(
            options.get::<DeduplicationIdentifier>().as_deref(),
            Some("users")
        );
        assert_eq!(options.get::<ThrottleOption>(), ThrottleBehavior::Throttled);
        assert!(!options.contains::<ThrottleOption>());
    }

    #[test]
    fn test_remove_restores_default() {
        let mut options = HttpOptions::new();
        options.set::<ThrottleOption>(ThrottleBehavior::Unthrottled);
        options.remove::<ThrottleOption>();
        assert_eq!(options.get::<ThrottleOption>(), ThrottleBehavior::Throttled);
    }

    #[test]
    fn test_clone_is_a_snapshot() {
        let mut original = HttpOptions::new();
        original.set::<SchemeOption>("http");

        let mut copy = original.clone();
        copy.set::<SchemeOption>("https");

        assert_eq!(original.get::<SchemeOption>(), "http");
        assert_eq!(copy.get::<SchemeOption>(), "https");
    }
}
