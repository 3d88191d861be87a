//! Deterministic digest encoding for cache keys.
//!
//! Every variable-length run (token lists, strings, blobs, value lists) is
//! prefixed with its length as a big-endian u64.

use crate::{
    key::{ParamRole, Token},
    value::Value,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

///
/// KeyDigest
///
/// Compact SHA-256 fingerprint of a key's token sequence. Bound values never
/// enter it. Extension identities are process-local, so digests of keys that
/// contain extensions are only comparable within one process.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct KeyDigest([u8; 32]);

impl KeyDigest {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn as_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            use std::fmt::Write as _;
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

impl fmt::Display for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

pub(super) fn digest_tokens(tokens: &[Token]) -> KeyDigest {
    let mut hasher = Sha256::new();
    hasher.update(b"cachekey:v2");
    write_tokens(&mut hasher, tokens);

    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    KeyDigest(out)
}

fn write_tokens(hasher: &mut Sha256, tokens: &[Token]) {
    write_len(hasher, tokens.len());
    for token in tokens {
        write_token(hasher, token);
    }
}

fn write_token(hasher: &mut Sha256, token: &Token) {
    match token {
        Token::Kind(kind) => {
            write_tag(hasher, 0x10);
            write_str(hasher, kind);
        }
        Token::Slot { name, opcode } => {
            write_tag(hasher, 0x11);
            write_str(hasher, name);
            write_tag(hasher, opcode.tag());
        }
        Token::Plain(value) => {
            write_tag(hasher, 0x12);
            write_value(hasher, value);
        }
        Token::Len(len) => {
            write_tag(hasher, 0x13);
            write_u32(hasher, *len);
        }
        Token::SubKey(tokens) => {
            write_tag(hasher, 0x14);
            write_tokens(hasher, tokens);
        }
        Token::BackRef(ordinal) => {
            write_tag(hasher, 0x15);
            write_u32(hasher, *ordinal);
        }
        Token::Absent => write_tag(hasher, 0x16),
        Token::Placeholder(role) => {
            write_tag(hasher, 0x17);
            write_role(hasher, role);
        }
        Token::Symbol(symbol) => {
            write_tag(hasher, 0x18);
            write_u32(hasher, *symbol);
        }
        Token::Extension(id) => {
            write_tag(hasher, 0x19);
            hasher.update(id.fingerprint().to_be_bytes());
        }
    }
}

fn write_role(hasher: &mut Sha256, role: &ParamRole) {
    match role {
        ParamRole::Named(name) => {
            write_tag(hasher, 0x01);
            write_str(hasher, name);
        }
        ParamRole::Anonymous(symbol) => {
            write_tag(hasher, 0x02);
            write_u32(hasher, *symbol);
        }
    }
}

fn write_value(hasher: &mut Sha256, value: &Value) {
    write_tag(hasher, value.canonical_tag().to_u8());
    match value {
        Value::Blob(bytes) => {
            write_len(hasher, bytes.len());
            hasher.update(bytes);
        }
        Value::Bool(v) => write_tag(hasher, u8::from(*v)),
        Value::Float64(v) => hasher.update(v.to_be_bytes()),
        Value::Int(v) => hasher.update(v.to_be_bytes()),
        Value::List(items) => {
            write_len(hasher, items.len());
            for item in items {
                write_value(hasher, item);
            }
        }
        Value::Text(text) => write_str(hasher, text),
        Value::Uint(v) => hasher.update(v.to_be_bytes()),
        Value::Null | Value::Unit => {}
    }
}

fn write_str(hasher: &mut Sha256, value: &str) {
    write_len(hasher, value.len());
    hasher.update(value.as_bytes());
}

fn write_len(hasher: &mut Sha256, len: usize) {
    hasher.update(u64::try_from(len).unwrap_or(u64::MAX).to_be_bytes());
}

fn write_u32(hasher: &mut Sha256, value: u32) {
    hasher.update(value.to_be_bytes());
}

fn write_tag(hasher: &mut Sha256, tag: u8) {
    hasher.update([tag]);
}

///
/// TESTS
///
