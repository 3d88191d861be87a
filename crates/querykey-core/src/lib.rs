//! Core engine for querykey: traversal schemas, the recursive key builder,
//! cache key objects, option bundles, and the ergonomics exported via the
//! `prelude`.

// public exports are one module level down
pub mod builder;
pub mod error;
pub mod key;
pub mod node;
pub mod obs;
pub mod options;
pub mod traversal;
pub mod value;


// re-exports
pub use builder::{KeyBuilder, generate_key, try_generate_key};
pub use error::Error;
pub use key::CacheKey;
pub use traversal::register_schema;

///
/// Prelude
///
/// Prelude contains only the vocabulary needed to declare node kinds and
/// request keys. Errors, metrics, and registry internals stay one level down.
///

pub mod prelude {
    pub use crate::{
        builder::generate_key,
        key::{BoundValue, CacheKey, ParamRole},
        node::{Attr, AttributeRef, BindParam, Extension, ExtensionError, Node, NodeRef},
        options::{OptionBundle, OptionField, OptionsDecl},
        traversal::{AttributeDecl, KindDecl, Opcode, Shape, Slot, register_schema},
        value::Value,
    };
}
