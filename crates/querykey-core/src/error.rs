use crate::{
    key::ValueArityError, node::ExtensionError, options::OptionsError, traversal::SchemaError,
};
use std::fmt;
use thiserror::Error as ThisError;

///
/// Error
///
/// Crate-level error aggregating every caller-facing failure.
/// Uncacheable trees are not errors; they yield no key.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    ValueArity(#[from] ValueArityError),

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error(transparent)]
    Extension(#[from] ExtensionError),
}

impl Error {
    /// Classification used by callers deciding whether to fall back to
    /// uncached compilation.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Schema(_) | Self::Options(_) | Self::Extension(_) => ErrorClass::Configuration,
            Self::ValueArity(_) => ErrorClass::Arity,
        }
    }

    #[must_use]
    pub const fn origin(&self) -> ErrorOrigin {
        match self {
            Self::Schema(_) => ErrorOrigin::Registry,
            Self::ValueArity(_) => ErrorOrigin::Key,
            Self::Options(_) => ErrorOrigin::Options,
            Self::Extension(_) => ErrorOrigin::Node,
        }
    }
}

///
/// ErrorClass
///
/// Configuration → a declaration is wrong; fix the code, do not retry.
/// Arity         → substituted values do not fit the key; recompile.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Configuration,
    Arity,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Configuration => "configuration",
            Self::Arity => "arity",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Registry,
    Key,
    Node,
    Options,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Registry => "registry",
            Self::Key => "key",
            Self::Node => "node",
            Self::Options => "options",
        };
        write!(f, "{label}")
    }
}

///
/// TESTS
///
