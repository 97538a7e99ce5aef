//! Persistent caches for kernelharness.
//!
//! * [`CacheStore`] keeps compiled kernel artifacts next to the content hash
//!   of the source they were built from. An entry is served only when the
//!   source still hashes to the stored value.
//! * [`ReferenceCache`] keeps golden CPU-reference outputs and compares
//!   candidate outputs against them byte for byte.
//!
//! Both are single-writer; files are replaced by writing a sibling temporary
//! file and renaming it over the target.

pub mod binary;
pub mod error;
pub mod golden;
pub mod hash;
pub mod layout;

pub use binary::*;
pub use error::*;
pub use golden::*;
pub use hash::*;
pub use layout::*;
