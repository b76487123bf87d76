#![forbid(unsafe_code)]
//! T2FS public API facade.
//!
//! Re-exports `t2fs-core` as the stable external interface. Downstream
//! consumers (the CLI, embedding applications) depend on this crate.

pub use t2fs_core::*;
