//! Identifier types for the credit ledger.
//!
//! Ledger records (accounts, events, transactions) use ULIDs so that ids sort in
//! creation order and double as pagination cursors. Owners and agents are identified by
//! opaque strings handed to us by the identity system.
//!
//! # Macro-based ID Types
//!
//! `ulid_id_type!` and `string_id_type!` generate the newtypes with consistent
//! serialization, parsing and display implementations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock, PoisonError};
use ulid::{Generator, Ulid};

/// Maximum accepted length of an owner or agent identifier.
pub const MAX_STRING_ID_LEN: usize = 128;

/// Generate the next ULID from the process-wide monotonic generator.
///
/// ULIDs minted in the same millisecond by [`Ulid::new`] are ordered randomly; going
/// through one [`Generator`] keeps them strictly increasing, which cursor pagination
/// relies on.
fn next_ulid() -> Ulid {
    static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

    let mut generator = GENERATOR
        .get_or_init(|| Mutex::new(Generator::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    // Overflow needs 2^80 ids within one millisecond.
    generator.generate().unwrap_or_else(|_| Ulid::new())
}

/// Macro to define a ULID-based identifier type with standard trait implementations.
///
/// This macro generates a newtype wrapper around `ulid::Ulid` with implementations for:
/// - `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `Serialize`, `Deserialize` (as the 26 character string form)
/// - `FromStr`, `Display`, `Debug`
/// - `TryFrom<String>`, `Into<String>`
///
/// # Example
///
/// ```ignore
/// ulid_id_type!(MyId, "A custom identifier type.");
/// let id = MyId::generate();
/// let parsed: MyId = id.to_string().parse().unwrap();
/// ```
macro_rules! ulid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Create an identifier from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Generate a new identifier, strictly greater than any generated before it.
            #[must_use]
            pub fn generate() -> Self {
                Self(next_ulid())
            }

            /// Return the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> &Ulid {
                &self.0
            }

            /// Return the big-endian bytes of the ULID (16 bytes, time-ordered).
            #[must_use]
            pub fn to_bytes(&self) -> [u8; 16] {
                self.0.to_bytes()
            }

            /// Create an identifier from its 16 byte form.
            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Ulid::from_bytes(bytes))
            }

            /// Millisecond timestamp encoded in the identifier.
            #[must_use]
            pub fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
                Ok(Self(ulid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

/// Macro to define an opaque string identifier.
///
/// Values must be non-empty, at most [`MAX_STRING_ID_LEN`] bytes and free of NUL bytes
/// (NUL separates components in storage keys).
macro_rules! string_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create an identifier, validating its contents.
            ///
            /// # Errors
            ///
            /// Returns an error if the value is empty, too long or contains NUL.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(IdError::Empty);
                }
                if value.len() > MAX_STRING_ID_LEN {
                    return Err(IdError::TooLong);
                }
                if value.contains('\0') {
                    return Err(IdError::InvalidCharacter);
                }
                Ok(Self(value))
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

ulid_id_type!(AccountId, "Surrogate identifier of a credit account.");
ulid_id_type!(EventId, "Identifier of a credit event.\n\nTime-ordered; used as the cursor when listing events.");
ulid_id_type!(TransactionId, "Identifier of a ledger posting.\n\nTime-ordered; used as the cursor when listing transactions.");

string_id_type!(OwnerId, "Identifier of an account owner (user, agent, company or platform).");
string_id_type!(AgentId, "Identifier of an agent hosted on the platform.");

impl OwnerId {
    /// Build an owner id from a compile-time constant known to be valid.
    pub(crate) fn from_static(value: &'static str) -> Self {
        Self(value.to_owned())
    }
}

impl From<AgentId> for OwnerId {
    fn from(id: AgentId) -> Self {
        Self(id.0)
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,

    /// The identifier is empty.
    #[error("identifier must not be empty")]
    Empty,

    /// The identifier exceeds the maximum length.
    #[error("identifier longer than 128 bytes")]
    TooLong,

    /// The identifier contains a forbidden character.
    #[error("identifier contains a NUL byte")]
    InvalidCharacter,
}
