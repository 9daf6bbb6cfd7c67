//! # stowage-image
//!
//! Image handling for the Stowage import core.
//!
//! Handles:
//! - **Archives**: Reading `docker save` tarballs without unpacking them.
//! - **References**: Parsing user names into canonical `load/` references.
//! - **Store**: Content-addressable repositories with atomic commits.
//! - **Layers**: Unpacking layers into a root filesystem, whiteouts included.
//! - **Hashing**: SHA-256 content verification.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod archive;
pub mod entry;
pub mod hash;
pub mod layer;
pub mod lock;
pub mod os_release;
pub mod reference;
pub mod store;
