//! Identifier newtypes for traces, spans and correlation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier shared by every span of one trace (32 hex characters).
    TraceId
);

string_id!(
    /// Identifier of a single span (16 hex characters).
    SpanId
);

string_id!(
    /// Cross-system correlation identifier, independent of the trace id.
    CorrelationId
);

impl TraceId {
    /// Generate a new random trace id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl SpanId {
    /// Generate a new random span id.
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(16);
        Self(id)
    }
}

impl CorrelationId {
    /// Generate a new correlation id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_shapes() {
        let trace_id = TraceId::generate();
        let span_id = SpanId::generate();
        let correlation_id = CorrelationId::generate();

        assert_eq!(trace_id.as_str().len(), 32);
        assert_eq!(span_id.as_str().len(), 16);
        assert!(span_id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(correlation_id.as_str().len(), 36);
        assert_ne!(TraceId::generate(), trace_id);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let span_id = SpanId::from("abcdef0123456789");
        let json = serde_json::to_string(&span_id).unwrap();
        assert_eq!(json, "\"abcdef0123456789\"");
    }
}
