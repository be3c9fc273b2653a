//! Data model for the multi-cloud infrastructure (MCI) orchestration core.
//!
//! This crate only defines types, identifier grammars and key layouts; all
//! behavior lives in the orchestration crates. Every record here serializes
//! as a self-describing JSON object with camelCase field names, which is the
//! representation stored in the key-value store and returned to callers.

mod ids;
pub use ids::*;

mod status;
pub use status::*;

mod resource;
pub use resource::*;

mod vm;
pub use vm::*;

mod mci;
pub use mci::*;

mod k8s;
pub use k8s::*;

mod provision;
pub use provision::*;

mod review;
pub use review::*;
