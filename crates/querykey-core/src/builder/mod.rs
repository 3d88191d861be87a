//! Recursive cache-key builder.
//!
//! One pass walks a tree depth-first, driven only by each node's registered
//! traversal schema. Scratch state (identity memo, symbol table, resolved
//! nodes kept alive) lives in the pass and is dropped when it ends.

pub(crate) mod memo;
pub(crate) mod symbols;

#[cfg(test)]
mod tests;

use crate::{
    key::{BoundValue, CacheKey, ParamRole, SubKey, Token},
    node::{Attr, AttributeRef, BindRole, Node, NodeRef},
    obs::sink::{MetricsEvent, record},
    traversal::{SchemaRegistry, Shape, Slot, TraversalSchema, registry::registry_read},
    value::Value,
};
use memo::{IdentityMemo, MemoState, NodeIdentity};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use symbols::SymbolTable;
use thiserror::Error as ThisError;

///
/// CONSTANTS
///

/// Default nesting limit; deeper trees are treated as uncacheable.
pub const DEFAULT_MAX_DEPTH: usize = 512;

///
/// BuilderConfig
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BuilderConfig {
    pub max_depth: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

///
/// Uncacheable
///
/// Why a tree produced no key. The pass is abandoned as a whole; no partial
/// key is ever returned.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum Uncacheable {
    #[error("node kind '{kind}' has no registered traversal schema")]
    UnregisteredKind { kind: &'static str },

    #[error("node of kind '{kind}' does not expose attribute '{attribute}'")]
    MissingAttribute {
        kind: &'static str,
        attribute: &'static str,
    },

    #[error("attribute '{kind}.{attribute}' is {found}, schema expects {expected}")]
    ShapeMismatch {
        kind: &'static str,
        attribute: &'static str,
        expected: Shape,
        found: Shape,
    },

    #[error("tree under '{kind}' nests deeper than {max_depth} levels")]
    DepthExceeded { kind: &'static str, max_depth: usize },
}

///
/// Schemas
/// where a pass looks up traversal schemas
///

#[derive(Clone, Copy, Debug)]
enum Schemas<'r> {
    /// The process registry, read under a short-lived guard per lookup so no
    /// lock is held while node callbacks run.
    Process,
    Explicit(&'r SchemaRegistry),
}

impl Schemas<'_> {
    fn lookup(self, kind: &str) -> Option<Arc<TraversalSchema>> {
        match self {
            Self::Process => registry_read().schema(kind),
            Self::Explicit(registry) => registry.schema(kind),
        }
    }
}

///
/// KeyBuilder
///

#[derive(Clone, Copy, Debug)]
pub struct KeyBuilder<'r> {
    schemas: Schemas<'r>,
    config: BuilderConfig,
}

impl KeyBuilder<'static> {
    /// Builder reading the process schema registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schemas: Schemas::Process,
            config: BuilderConfig::default(),
        }
    }
}

impl Default for KeyBuilder<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r> KeyBuilder<'r> {
    #[must_use]
    pub fn with_registry(registry: &'r SchemaRegistry) -> Self {
        Self {
            schemas: Schemas::Explicit(registry),
            config: BuilderConfig::default(),
        }
    }

    #[must_use]
    pub const fn with_config(mut self, config: BuilderConfig) -> Self {
        self.config = config;
        self
    }

    /// Generate the key for `root`, or `None` if the tree is not cacheable.
    #[must_use]
    pub fn generate(&self, root: &dyn Node) -> Option<CacheKey> {
        match self.try_generate(root) {
            Ok(key) => Some(key),
            Err(reason) => {
                tracing::warn!(root = root.kind(), %reason, "tree is not cacheable");
                None
            }
        }
    }

    /// Generate the key for `root`, reporting why a tree is not cacheable.
    pub fn try_generate(&self, root: &dyn Node) -> Result<CacheKey, Uncacheable> {
        let mut pass = Pass::new(self.schemas, self.config);
        let root_kind = root.kind();

        match pass.key_node(root) {
            Ok(tokens) => {
                record(MetricsEvent::KeyGenerated {
                    kind: root_kind,
                    tokens: pass.stats.tokens,
                    bound_values: pass.bound.len() as u64,
                    back_refs: pass.stats.back_refs,
                    symbols: pass.symbols.len() as u64,
                });

                Ok(CacheKey::new(tokens, pass.bound))
            }
            Err(reason) => {
                record(MetricsEvent::Uncacheable { kind: root_kind });

                Err(reason)
            }
        }
    }
}

/// Generate the key for `root` against the process schema registry.
#[must_use]
pub fn generate_key(root: &dyn Node) -> Option<CacheKey> {
    KeyBuilder::new().generate(root)
}

/// Like [`generate_key`], reporting why a tree is not cacheable.
pub fn try_generate_key(root: &dyn Node) -> Result<CacheKey, Uncacheable> {
    KeyBuilder::new().try_generate(root)
}

///
/// PassStats
///

#[derive(Debug, Default)]
struct PassStats {
    tokens: u64,
    back_refs: u64,
}

///
/// Pass
/// scratch state for one top-level key generation
///

struct Pass<'r> {
    schemas: Schemas<'r>,
    // schemas already looked up in this pass
    resolved: HashMap<&'static str, Arc<TraversalSchema>>,
    config: BuilderConfig,
    memo: IdentityMemo,
    symbols: SymbolTable,
    bound: Vec<BoundValue>,
    // nodes materialized during the pass; held so their addresses stay unique
    keepalive: Vec<NodeRef>,
    depth: usize,
    stats: PassStats,
}

impl<'r> Pass<'r> {
    fn new(schemas: Schemas<'r>, config: BuilderConfig) -> Self {
        Self {
            schemas,
            resolved: HashMap::new(),
            config,
            memo: IdentityMemo::default(),
            symbols: SymbolTable::default(),
            bound: Vec::new(),
            keepalive: Vec::new(),
            depth: 0,
            stats: PassStats::default(),
        }
    }

    /// Sub-key for `node`, or a back-reference if it was already entered.
    fn visit(&mut self, node: &dyn Node) -> Result<Token, Uncacheable> {
        if let Some(state) = self.memo.lookup(NodeIdentity::of(node)) {
            self.stats.back_refs += 1;
            if let MemoState::InProgress(ordinal) = state {
                tracing::debug!(kind = node.kind(), ordinal, "cycle collapsed to back-reference");
            }

            return Ok(Token::BackRef(state.ordinal()));
        }

        self.key_node(node).map(Token::SubKey)
    }

    /// Enter `node` in the memo and key its slots.
    fn key_node(&mut self, node: &dyn Node) -> Result<SubKey, Uncacheable> {
        let kind = node.kind();
        let schema = self.schema(kind)?;

        if self.depth >= self.config.max_depth {
            return Err(Uncacheable::DepthExceeded {
                kind,
                max_depth: self.config.max_depth,
            });
        }

        let identity = NodeIdentity::of(node);
        self.memo.enter(identity);
        self.depth += 1;
        let result = self.visit_slots(node, &schema);
        self.depth -= 1;

        let tokens = result?;
        self.memo.complete(identity);
        self.stats.tokens += tokens.len() as u64;

        Ok(tokens.into())
    }

    fn schema(&mut self, kind: &'static str) -> Result<Arc<TraversalSchema>, Uncacheable> {
        if let Some(schema) = self.resolved.get(kind) {
            return Ok(Arc::clone(schema));
        }

        let schema = self
            .schemas
            .lookup(kind)
            .ok_or(Uncacheable::UnregisteredKind { kind })?;
        self.resolved.insert(kind, Arc::clone(&schema));

        Ok(schema)
    }

    fn visit_slots(
        &mut self,
        node: &dyn Node,
        schema: &TraversalSchema,
    ) -> Result<Vec<Token>, Uncacheable> {
        let kind = schema.kind();
        let mut out = Vec::with_capacity(1 + schema.slots().len() * 2);
        out.push(Token::Kind(kind));

        for slot in schema.slots() {
            let attr = node
                .attribute(slot.name)
                .ok_or(Uncacheable::MissingAttribute {
                    kind,
                    attribute: slot.name,
                })?;

            let expected = slot.opcode.expected_shape();
            let found = attr.shape();
            if found != expected {
                return Err(Uncacheable::ShapeMismatch {
                    kind,
                    attribute: slot.name,
                    expected,
                    found,
                });
            }

            out.push(Token::Slot {
                name: slot.name,
                opcode: slot.opcode,
            });
            self.emit(node, slot, attr, &mut out)?;
        }

        Ok(out)
    }

    fn emit(
        &mut self,
        node: &dyn Node,
        slot: &Slot,
        attr: Attr<'_>,
        out: &mut Vec<Token>,
    ) -> Result<(), Uncacheable> {
        match attr {
            Attr::Plain(value) => out.push(Token::Plain(value.into_owned())),

            Attr::Node(Some(child)) => out.push(self.visit(child)?),
            Attr::Node(None) => out.push(Token::Absent),

            Attr::Nodes(children) => {
                out.push(Token::Len(len_u32(children.len())));
                for child in children {
                    out.push(self.visit(child.as_ref())?);
                }
            }

            Attr::Mapping(entries) => {
                // later entries win; BTreeMap gives name order
                let sorted: BTreeMap<&str, &Value> = entries
                    .iter()
                    .map(|(name, value)| (name.as_str(), value))
                    .collect();

                out.push(Token::Len(len_u32(sorted.len())));
                for (name, value) in sorted {
                    out.push(Token::Plain(Value::Text(name.to_string())));
                    out.push(Token::Plain(value.clone()));
                }
            }

            Attr::Bound(param) => {
                let role = match param.role() {
                    BindRole::Named(name) => ParamRole::Named(name.clone()),
                    BindRole::Anonymous(anon) => ParamRole::Anonymous(self.symbols.resolve(anon)),
                };

                out.push(Token::Placeholder(role.clone()));
                self.bound.push(BoundValue::new(role, param.value().clone()));
            }

            Attr::Symbol(anon) => out.push(Token::Symbol(self.symbols.resolve(anon))),

            Attr::Deferred(AttributeRef::Resolved(target)) => out.push(self.visit(target.as_ref())?),
            Attr::Deferred(AttributeRef::Name(name)) => {
                match node.resolve_reference(slot.name, name) {
                    Some(resolved) => {
                        out.push(self.visit(resolved.as_ref())?);
                        self.keepalive.push(resolved);
                    }
                    None => out.push(Token::Plain(Value::Text(name.to_string()))),
                }
            }

            Attr::Extension(extension) => {
                out.push(Token::Extension(extension.id()));

                let start = self.bound.len();
                if let Some(produced) = extension.invoke() {
                    // produced structure is not keyed; isolate it from the
                    // outer memo so it cannot swallow shared nodes
                    let outer = std::mem::take(&mut self.memo);
                    let result = self.visit(produced.as_ref());
                    self.memo = outer;
                    result?;
                    self.keepalive.push(produced);
                }

                let extracted = &self.bound[start..];
                out.push(Token::Len(len_u32(extracted.len())));
                out.extend(
                    extracted
                        .iter()
                        .map(|bound| Token::Placeholder(bound.role.clone())),
                );
            }

            Attr::Opaque => {
                return Err(Uncacheable::ShapeMismatch {
                    kind: node.kind(),
                    attribute: slot.name,
                    expected: slot.opcode.expected_shape(),
                    found: Shape::Opaque,
                });
            }
        }

        Ok(())
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
