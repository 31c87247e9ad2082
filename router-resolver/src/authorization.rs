//! Field-level authorization.
//!
//! The resolver consults an external [`Authorizer`] for fields whose plan
//! info carries an authorization rule, and memoizes each decision for the
//! rest of the request: a (datasource, type, field) triple is authorized at
//! most once.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::io;

use tower::BoxError;
use xxhash_rust::xxh64::Xxh64;

use crate::context::Context;

/// A schema position: the pair of a type name and one of its field names.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct GraphCoordinate {
    pub type_name: String,
    pub field_name: String,
}

impl fmt::Display for GraphCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

/// A refusal to load a field.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct AuthorizationDeny {
    /// Surfaced to the client in the error message when present.
    pub reason: Option<String>,
}

/// External authorization decisions for object fields.
///
/// `authorize_object_field` receives the parent object serialized flat
/// (primitive fields only) and returns `None` to admit the field or a deny
/// to reject it. An `Err` is fatal for the whole request.
pub trait Authorizer: Send + Sync {
    fn has_response_extension_data(&self, ctx: &Context) -> bool;

    fn render_response_extension(
        &self,
        ctx: &Context,
        out: &mut dyn io::Write,
    ) -> Result<(), BoxError>;

    fn authorize_object_field(
        &self,
        ctx: &Context,
        data_source_id: &str,
        object: &[u8],
        coordinate: &GraphCoordinate,
    ) -> Result<Option<AuthorizationDeny>, BoxError>;
}

/// External rate limiter; only its response extension output is part of the
/// resolver contract.
pub trait RateLimiter: Send + Sync {
    fn render_response_extension(
        &self,
        ctx: &Context,
        out: &mut dyn io::Write,
    ) -> Result<(), BoxError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CachedDecision {
    Allow,
    Deny(Option<String>),
}

/// Per-request memo of allow/deny decisions, keyed by a 64-bit xxhash of
/// `datasource_id || type_name || field_name`. Collisions at 64 bits are
/// acceptable for per-request cardinalities.
pub(crate) struct AuthorizationCache {
    digest: Xxh64,
    allow: HashSet<u64>,
    deny: HashMap<u64, Option<String>>,
}

impl AuthorizationCache {
    pub(crate) fn new() -> Self {
        Self {
            digest: Xxh64::new(0),
            allow: HashSet::new(),
            deny: HashMap::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.digest.reset(0);
        self.allow.clear();
        self.deny.clear();
    }

    pub(crate) fn decision_key(&mut self, data_source_id: &str, coordinate: &GraphCoordinate) -> u64 {
        self.digest.reset(0);
        self.digest.update(data_source_id.as_bytes());
        self.digest.update(coordinate.type_name.as_bytes());
        self.digest.update(coordinate.field_name.as_bytes());
        self.digest.digest()
    }

    pub(crate) fn get(&self, key: u64) -> Option<CachedDecision> {
        if self.allow.contains(&key) {
            return Some(CachedDecision::Allow);
        }
        self.deny.get(&key).map(|reason| CachedDecision::Deny(reason.clone()))
    }

    pub(crate) fn insert(&mut self, key: u64, decision: Option<&AuthorizationDeny>) {
        match decision {
            None => {
                self.allow.insert(key);
            }
            Some(deny) => {
                self.deny.insert(key, deny.reason.clone());
            }
        }
    }
}
