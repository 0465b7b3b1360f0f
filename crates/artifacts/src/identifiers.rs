//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`GroupId`] with an [`ArtifactName`] even though both are strings under the
//! hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: coordinate components
// ---------------------------------------------------------------------------

string_id! {
    /// A Maven group id in dotted form (e.g. `"com.google.guava"`).
    GroupId
}

string_id! {
    /// A Maven artifact id (e.g. `"guava"`).
    ArtifactName
}

string_id! {
    /// An artifact classifier (e.g. `"jdk8"`, `"natives-linux"`).
    Classifier
}

string_id! {
    /// Identifies a repository within a [`crate::RepositorySet`].
    ///
    /// Ids are unique per set and are used for descriptor overrides and in
    /// diagnostics.
    RepositoryId
}

// ---------------------------------------------------------------------------
// Identifiers: internally generated
// ---------------------------------------------------------------------------

/// Identifies a single load session (one invocation of the orchestrator's `load`).
///
/// Propagated through spans so all activity from a single session can be
/// correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadSessionId(Uuid);

impl LoadSessionId {
    /// Generates a new random session identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for LoadSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle the host returns for a code source it accepted.
///
/// The engine never interprets the value; it is reported back to the host in
/// the [`crate::LoadResult`] so the host can correlate its own bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeUnitHandle(u64);

impl CodeUnitHandle {
    /// Creates a handle from a raw host-assigned integer.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CodeUnitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
