//! Node vocabulary consumed by the key builder.
//!
//! The builder knows nothing about what a node means. It asks a node for its
//! kind, then for each slot of that kind's schema it asks for an [`Attr`]
//! view and dispatches on the slot's opcode.

use crate::{traversal::Shape, value::Value};
use std::{
    any::{TypeId, type_name},
    borrow::Cow,
    fmt,
    hash::{Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use thiserror::Error as ThisError;

/// Shared handle to an immutable node.
pub type NodeRef = Arc<dyn Node>;

///
/// Node
///
/// Any tree element participating in cache keys. Nodes are immutable for the
/// duration of key generation; the builder uses their address as a pass-local
/// identity.
///

pub trait Node: Send + Sync {
    /// Stable kind identifier; selects the registered traversal schema.
    fn kind(&self) -> &'static str;

    /// View of one declared attribute, or `None` if the node does not expose it.
    fn attribute(&self, name: &str) -> Option<Attr<'_>>;

    /// Resolve a string-form deferred reference held by `attribute`.
    ///
    /// Returning `None` leaves the name unresolved; it is then keyed as text.
    fn resolve_reference(&self, _attribute: &str, _name: &str) -> Option<NodeRef> {
        None
    }
}

impl fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.kind())
    }
}

///
/// Attr
///
/// Borrowed view of one attribute value, one variant per [`Shape`].
///

pub enum Attr<'a> {
    Plain(Cow<'a, Value>),
    Node(Option<&'a dyn Node>),
    Nodes(&'a [NodeRef]),
    Mapping(&'a [(String, Value)]),
    Bound(&'a BindParam),
    Symbol(&'a AnonName),
    Deferred(&'a AttributeRef),
    Extension(&'a Extension),
    Opaque,
}

impl Attr<'_> {
    #[must_use]
    pub const fn shape(&self) -> Shape {
        match self {
            Self::Plain(_) => Shape::Plain,
            Self::Node(_) => Shape::Node,
            Self::Nodes(_) => Shape::NodeList,
            Self::Mapping(_) => Shape::Mapping,
            Self::Bound(_) => Shape::Bound,
            Self::Symbol(_) => Shape::Symbol,
            Self::Deferred(_) => Shape::Deferred,
            Self::Extension(_) => Shape::Extension,
            Self::Opaque => Shape::Opaque,
        }
    }

    /// Plain view over a borrowed value.
    #[must_use]
    pub const fn value(value: &Value) -> Attr<'_> {
        Attr::Plain(Cow::Borrowed(value))
    }

    /// Plain view over a value computed on demand.
    #[must_use]
    pub fn owned(value: impl Into<Value>) -> Self {
        Self::Plain(Cow::Owned(value.into()))
    }

    /// Single-child view over an optional shared node.
    #[must_use]
    pub fn child(node: Option<&NodeRef>) -> Attr<'_> {
        Attr::Node(node.map(|node| &**node))
    }
}

///
/// AnonName
///
/// Internally generated unique name (aliases, anonymous labels). The id is
/// process-unique; the label is cosmetic and never keyed.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct AnonName {
    id: u64,
    label: Cow<'static, str>,
}

static NEXT_ANON_ID: AtomicU64 = AtomicU64::new(1);

impl AnonName {
    /// Generate a fresh, process-unique name.
    #[must_use]
    pub fn generate(label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id: NEXT_ANON_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for AnonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.label, self.id)
    }
}

///
/// BindRole
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum BindRole {
    Named(Cow<'static, str>),
    Anonymous(AnonName),
}

///
/// BindParam
///
/// Literal value destined for parameterized execution. Only its role is part
/// of a key; the value travels in the key's side list.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindParam {
    role: BindRole,
    value: Value,
}

impl BindParam {
    #[must_use]
    pub fn named(name: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        Self {
            role: BindRole::Named(name.into()),
            value: value.into(),
        }
    }

    /// Bind parameter with a generated name derived from `label`.
    #[must_use]
    pub fn anonymous(label: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        Self {
            role: BindRole::Anonymous(AnonName::generate(label)),
            value: value.into(),
        }
    }

    #[must_use]
    pub const fn role(&self) -> &BindRole {
        &self.role
    }

    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }
}

///
/// AttributeRef
///
/// Attribute given either by name or as an already-resolved node.
///

#[derive(Clone)]
pub enum AttributeRef {
    Name(Cow<'static, str>),
    Resolved(NodeRef),
}

impl AttributeRef {
    #[must_use]
    pub fn name(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Name(name.into())
    }
}

impl fmt::Debug for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "AttributeRef::Name({name:?})"),
            Self::Resolved(node) => write!(f, "AttributeRef::Resolved({})", node.kind()),
        }
    }
}

///
/// ExtensionId
///
/// Identity of a callable definition.
///
/// Closures and fn items each have their own type, so the type alone is the
/// identity: one closure literal invoked with different captures shares an
/// id, two textually identical literals never do. Fn pointers and `dyn Fn`
/// values share one type across every function they may hold; pointers are
/// keyed by address, erased callables need an explicit key type.
/// Stable within one process only.
///

#[derive(Clone, Copy, Debug)]
pub struct ExtensionId {
    type_id: TypeId,
    address: usize,
    name: &'static str,
}

impl ExtensionId {
    /// Identity of the callable type `C`, rejecting types that erase the
    /// function they hold.
    pub fn of<C: 'static>() -> Result<Self, ExtensionError> {
        let name = type_name::<C>();
        if is_erased(name) {
            return Err(ExtensionError::ErasedCallable { type_name: name });
        }

        Ok(Self::keyed::<C>())
    }

    /// Identity taken from `K` as given, without checking it.
    #[must_use]
    pub fn keyed<K: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<K>(),
            address: 0,
            name: type_name::<K>(),
        }
    }

    /// Identity of one plain function, by address.
    #[must_use]
    pub fn of_fn(producer: fn() -> Option<NodeRef>) -> Self {
        Self {
            type_id: TypeId::of::<fn() -> Option<NodeRef>>(),
            address: producer as usize,
            name: type_name::<fn() -> Option<NodeRef>>(),
        }
    }

    /// Diagnostic name of the callable's type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Process-local 64-bit fingerprint used by digests.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl PartialEq for ExtensionId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.address == other.address
    }
}

impl Eq for ExtensionId {}

impl Hash for ExtensionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.address.hash(state);
    }
}

// fn pointers and trait objects anywhere in the type mean one type can stand
// for many functions
fn is_erased(type_name: &str) -> bool {
    type_name.contains("fn(") || type_name.contains("dyn ")
}

///
/// ExtensionError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum ExtensionError {
    #[error(
        "callable type '{type_name}' can hold different functions; use Extension::from_fn or Extension::keyed"
    )]
    ErasedCallable { type_name: &'static str },
}

type Producer = dyn Fn() -> Option<NodeRef> + Send + Sync;

///
/// Extension
///
/// User-supplied callable attribute. Keyed by [`ExtensionId`]; the node it
/// produces when invoked only contributes bound parameters.
///

#[derive(Clone)]
pub struct Extension {
    id: ExtensionId,
    producer: Arc<Producer>,
}

impl Extension {
    /// Wrap a closure or fn item, keyed by its own type.
    pub fn new<F>(producer: F) -> Result<Self, ExtensionError>
    where
        F: Fn() -> Option<NodeRef> + Send + Sync + 'static,
    {
        Ok(Self::with_id(ExtensionId::of::<F>()?, producer))
    }

    /// Wrap an adapter around the user's callable `C`, keyed by `C`.
    ///
    /// Used when the callable takes arguments and the producer only supplies
    /// them; the adapter's own type would otherwise be the identity.
    pub fn adapting<C, F>(producer: F) -> Result<Self, ExtensionError>
    where
        C: 'static,
        F: Fn() -> Option<NodeRef> + Send + Sync + 'static,
    {
        Ok(Self::with_id(ExtensionId::of::<C>()?, producer))
    }

    /// Wrap a plain function pointer, keyed by its address.
    #[must_use]
    pub fn from_fn(producer: fn() -> Option<NodeRef>) -> Self {
        Self::with_id(ExtensionId::of_fn(producer), producer)
    }

    /// Wrap any producer under the caller-chosen key type `K`.
    ///
    /// `K` must be dedicated to one behaviour; producers sharing a key share
    /// cached output.
    pub fn keyed<K, F>(producer: F) -> Self
    where
        K: 'static,
        F: Fn() -> Option<NodeRef> + Send + Sync + 'static,
    {
        Self::with_id(ExtensionId::keyed::<K>(), producer)
    }

    fn with_id<F>(id: ExtensionId, producer: F) -> Self
    where
        F: Fn() -> Option<NodeRef> + Send + Sync + 'static,
    {
        Self {
            id,
            producer: Arc::new(producer),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ExtensionId {
        self.id
    }

    #[must_use]
    pub fn invoke(&self) -> Option<NodeRef> {
        (self.producer)()
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("id", &self.id.name)
            .finish_non_exhaustive()
    }
}
