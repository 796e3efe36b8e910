//! On-disk page storage.
//!
//! - the identifier codec ([`encode`], [`decode`]) maps identifiers to relative paths and back
//! - [`FileStore`] performs existence checks, placeholder claims, durable
//!   saves and staleness reads under a root directory

mod codec;
mod error;
mod file_store;

pub use codec::{CodecError, FILE_SUFFIX, Identifier, Scheme, decode, encode, normalize};
pub use error::StoreError;
pub use file_store::{
    Claim, FileStore, PLACEHOLDER, SavedFile, StaleRead, is_partial_file, is_stale_content,
};
