//! ## Crate layout
//! - `core`: traversal schemas, the key builder, cache keys, option bundles,
//!   values, and observability.
//!
//! The `prelude` module carries what a node-kind author needs: the node
//! vocabulary, schema declarations, and key generation.

pub use querykey_core as core;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use crate::core::{CacheKey, Error, KeyBuilder, generate_key, register_schema, try_generate_key};

///
/// Prelude
///

pub mod prelude {
    pub use crate::core::{
        key::{BoundValue, CacheKey, KeyDigest, ParamRole},
        node::{AnonName, Attr, AttributeRef, BindParam, Extension, ExtensionError, Node, NodeRef},
        options::{OptionBundle, OptionField, OptionsDecl},
        traversal::{AttributeDecl, KindDecl, Opcode, RegisterOutcome, Shape, Slot},
        value::Value,
    };
    pub use crate::{generate_key, register_schema};
}

///
/// TESTS
///
