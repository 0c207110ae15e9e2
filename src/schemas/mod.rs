//! Domain model shared across the pipeline stages.
//!
//! Wire structs that cross the collaborator HTTP boundary use
//! `#[serde(rename_all = "camelCase")]`; queue-local types stay snake_case.

pub mod canonical_item;
pub mod common;
pub mod job;
pub mod raw_item;
pub mod source;

pub use canonical_item::*;
pub use common::*;
pub use job::*;
pub use raw_item::*;
pub use source::*;

pub const CURRENT_SCHEMA_VERSION: &str = "1.0.0";
