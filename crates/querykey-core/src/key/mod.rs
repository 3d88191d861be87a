//! Cache key object: immutable token sequence plus extracted bound values.

mod digest;


use crate::{node::ExtensionId, traversal::Opcode, value::Value};
use std::{
    borrow::Cow,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};
use thiserror::Error as ThisError;

// re-exports
pub use digest::KeyDigest;

/// Shared, immutable token run for one node.
pub type SubKey = Arc<[Token]>;

///
/// Token
///
/// One element of a key. Sub-keys nest; equality recurses through them.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Token {
    /// Leading tag of every sub-key.
    Kind(&'static str),
    /// Attribute header: slot name and dispatch opcode.
    Slot {
        name: &'static str,
        opcode: Opcode,
    },
    Plain(Value),
    /// Element count for lists and mappings.
    Len(u32),
    SubKey(SubKey),
    /// Reference to a node already keyed in this pass, by preorder ordinal.
    BackRef(u32),
    /// Absent optional child.
    Absent,
    Placeholder(ParamRole),
    /// Normalized anonymous name.
    Symbol(u32),
    Extension(ExtensionId),
}

///
/// ParamRole
///
/// Role of one bound-parameter placeholder. Anonymous roles carry the
/// pass-local symbol number rather than the generated name.
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ParamRole {
    Named(Cow<'static, str>),
    Anonymous(u32),
}

impl fmt::Display for ParamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, ":{name}"),
            Self::Anonymous(n) => write!(f, ":anon_{n}"),
        }
    }
}

///
/// BoundValue
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoundValue {
    pub role: ParamRole,
    pub value: Value,
}

impl BoundValue {
    #[must_use]
    pub const fn new(role: ParamRole, value: Value) -> Self {
        Self { role, value }
    }
}

///
/// ValueArityError
///
/// Substituted bound values do not line up with the key's placeholders.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum ValueArityError {
    #[error("expected {expected} bound values, found {found}")]
    Length { expected: usize, found: usize },

    #[error("bound value at position {position} has role {found}, expected {expected}")]
    Role {
        position: usize,
        expected: ParamRole,
        found: ParamRole,
    },
}

///
/// CacheKey
///
/// Structural fingerprint of a construct tree. Equality and hashing look at
/// the token sequence only; bound values ride along for execution.
///

#[derive(Clone)]
pub struct CacheKey {
    tokens: SubKey,
    bound: Vec<BoundValue>,
}

impl CacheKey {
    pub(crate) const fn new(tokens: SubKey, bound: Vec<BoundValue>) -> Self {
        Self { tokens, bound }
    }

    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[must_use]
    pub fn bound_values(&self) -> &[BoundValue] {
        &self.bound
    }

    /// Placeholder roles in discovery order.
    pub fn placeholders(&self) -> impl Iterator<Item = &ParamRole> {
        self.bound.iter().map(|bound| &bound.role)
    }

    /// Kind tag of the root node.
    #[must_use]
    pub fn root_kind(&self) -> Option<&'static str> {
        match self.tokens.first() {
            Some(Token::Kind(kind)) => Some(*kind),
            _ => None,
        }
    }

    /// Stable SHA-256 fingerprint of the token sequence.
    #[must_use]
    pub fn digest(&self) -> KeyDigest {
        digest::digest_tokens(&self.tokens)
    }

    /// Pair this key with a new set of execution values.
    ///
    /// Length and per-position roles must match the original placeholders.
    pub fn with_values(&self, values: Vec<BoundValue>) -> Result<ParameterizedKey, ValueArityError> {
        if values.len() != self.bound.len() {
            return Err(ValueArityError::Length {
                expected: self.bound.len(),
                found: values.len(),
            });
        }

        for (position, (expected, found)) in self.bound.iter().zip(&values).enumerate() {
            if expected.role != found.role {
                return Err(ValueArityError::Role {
                    position,
                    expected: expected.role.clone(),
                    found: found.role.clone(),
                });
            }
        }

        Ok(ParameterizedKey {
            tokens: Arc::clone(&self.tokens),
            values,
        })
    }

    /// Pair this key with positional literals, reusing the existing roles.
    pub fn with_literals<I>(&self, literals: I) -> Result<ParameterizedKey, ValueArityError>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let literals: Vec<Value> = literals.into_iter().map(Into::into).collect();
        if literals.len() != self.bound.len() {
            return Err(ValueArityError::Length {
                expected: self.bound.len(),
                found: literals.len(),
            });
        }

        let values = self
            .bound
            .iter()
            .zip(literals)
            .map(|(bound, value)| BoundValue::new(bound.role.clone(), value))
            .collect();

        Ok(ParameterizedKey {
            tokens: Arc::clone(&self.tokens),
            values,
        })
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tokens, &other.tokens) || self.tokens == other.tokens
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tokens.hash(state);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("tokens", &self.tokens)
            .field("bound", &self.bound)
            .finish()
    }
}

///
/// ParameterizedKey
///
/// Execution-ready pairing of an unchanged key with fresh literal values.
///

#[derive(Clone, Debug)]
pub struct ParameterizedKey {
    tokens: SubKey,
    values: Vec<BoundValue>,
}

impl ParameterizedKey {
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[must_use]
    pub fn values(&self) -> &[BoundValue] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<BoundValue> {
        self.values
    }

    /// True when this pairing was derived from a key equal to `key`.
    #[must_use]
    pub fn matches(&self, key: &CacheKey) -> bool {
        Arc::ptr_eq(&self.tokens, &key.tokens) || self.tokens == key.tokens
    }
}
