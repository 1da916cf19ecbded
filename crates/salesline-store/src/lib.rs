//! salesline-store: content-addressable store for staged stage outputs
//!
//! Each stage writes its output under the blake3 hash of its inputs, so a
//! re-run with unchanged inputs reuses the committed output and a handle
//! (input hash + content hash) is enough to find and verify it later.

pub mod hash;
pub mod manifest;
pub mod stage;
pub mod store;

pub use manifest::{FileCheck, StageManifest};
pub use stage::{StageInput, StageName};
pub use store::{Lookup, RunRecord, StageRef, Store, StoreEntry};
