//! Covenant Version
//!
//! Durable storage and lifecycle orchestration for policy versions.
//! Versions move Draft -> Review -> Approved -> Active -> Deprecated,
//! forward only; at most one version per policy is Active at any time,
//! and every mutating operation emits exactly one audit entry before
//! returning success.

pub mod error;
pub mod merge;
pub mod service;
pub mod store;

pub use error::{VersionError, VersionResult};
pub use merge::{three_way_merge, MergeConflict, MergeOutcome, MergeResolution};
pub use service::{CreateVersionRequest, VersionService};
pub use store::InMemoryVersionStore;
