//! # orbit-id
//!
//! Typed identifiers for the orbit isolate platform.
//!
//! Isolates are addressed by their human-chosen *name* on the signal bus,
//! but every launch of an isolate also carries a system-generated UID so
//! that two incarnations of the same isolate can never be confused.
//!
//! ## ID Format
//!
//! All generated IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! - `iso_01HV4Z2WQXKJNM8GPQY6VBKC3D` (isolate UID)
//! - `fkr_01HV4Z3MXNKPQR9HSTZ7WCLD4E` (forker ID)
//! - `sub_01HV4Z4NYPLTRS0JTUA8XDME5F` (signal subscription)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;

/// Splits `{prefix}_{ulid}` and checks the prefix.
#[doc(hidden)]
pub fn split_prefixed(s: &str, expected: &'static str) -> Result<Ulid, IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }

    let Some((prefix, ulid_str)) = s.split_once('_') else {
        return Err(IdError::MissingSeparator);
    };

    if prefix != expected {
        return Err(IdError::InvalidPrefix {
            expected,
            actual: prefix.to_string(),
        });
    }

    ulid_str
        .parse::<Ulid>()
        .map_err(|e| IdError::InvalidUlid(e.to_string()))
}
