//! Covenant Core
//!
//! Shared building blocks for the policy lifecycle governance core:
//! typed identifiers, canonical timestamps, content and integrity hashing,
//! the persisted data model (versions, changes, audit entries, rollback
//! plans), and the `VersionStore` persistence seam every service consumes.

pub mod crypto;
pub mod error;
pub mod traits;
pub mod types;

pub use crypto::*;
pub use error::*;
pub use traits::*;
pub use types::*;
