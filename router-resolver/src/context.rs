//! Per-request resolver context.
//!
//! A [`Context`] carries everything a single request needs besides the plan
//! and the raw data: variables, type name rewrites, the optional
//! authorizer / rate limiter / trace collaborators and their options, and
//! the per-request accumulators (stats, subgraph errors).

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value;

use crate::authorization::Authorizer;
use crate::authorization::RateLimiter;
use crate::plan::ObjectNode;

/// The GraphQL operation kind of the request being resolved.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.default_type_name())
    }
}

impl OperationKind {
    pub(crate) const fn default_type_name(&self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }
}

/// A type name rewrite applied to `__typename` values before they reach the
/// client, used to hide internal type names.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RenameTypeName {
    pub from: ByteString,
    pub to: ByteString,
}

/// Rate limiting options for the response extension.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimitOptions {
    /// Enable rate limiting for the request.
    pub enabled: bool,
    /// Include rate limit stats in the `extensions` object of the response.
    pub include_stats_in_response_extension: bool,
}

/// Tracing options for the response extension.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct TracingOptions {
    /// Enable trace collection for the request.
    pub enabled: bool,
    /// Include the trace output in the `extensions` object of the response.
    pub include_trace_output_in_response_extensions: bool,
    /// Render the trace with debug detail.
    pub debug: bool,
}

/// Counters incremented while streaming the response data.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ResolveStats {
    pub resolved_nodes: usize,
    pub resolved_objects: usize,
    pub resolved_leafs: usize,
}

/// Produces the trace for the `extensions.trace` output. The resolver treats
/// the trace as an opaque JSON value.
pub trait TraceProvider: Send + Sync {
    fn get_trace(&self, ctx: &Context, fetch_tree: &ObjectNode, debug: bool) -> Value;
}

/// A structured record of a field an upstream authorizer refused to load,
/// kept on the context so transports can report per-subgraph failures.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SubgraphError {
    pub data_source_id: String,
    pub field_path: String,
    pub reason: Option<String>,
}

impl fmt::Display for SubgraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(
                f,
                "subgraph '{}' denied field '{}': {reason}",
                self.data_source_id, self.field_path
            ),
            None => write!(
                f,
                "subgraph '{}' denied field '{}'",
                self.data_source_id, self.field_path
            ),
        }
    }
}

impl std::error::Error for SubgraphError {}

/// Per-request context. Not reused across requests; the resolver itself is
/// pooled instead.
#[derive(Clone, Default)]
pub struct Context {
    /// Raw JSON object holding the operation variables, consulted by
    /// `@skip` / `@include` evaluation.
    pub variables: Option<Bytes>,
    pub rename_type_names: Vec<RenameTypeName>,
    pub rate_limit_options: RateLimitOptions,
    pub tracing_options: TracingOptions,
    pub authorizer: Option<Arc<dyn Authorizer>>,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub trace_provider: Option<Arc<dyn TraceProvider>>,
    pub stats: ResolveStats,
    subgraph_errors: Vec<SubgraphError>,
}

#[buildstructor::buildstructor]
impl Context {
    /// Returns a builder for a [`Context`].
    ///
    /// All fields are optional; an empty context resolves a request without
    /// variables, renames, authorization, rate limiting or tracing.
    #[builder(visibility = "pub")]
    fn new(
        variables: Option<Bytes>,
        rename_type_names: Vec<RenameTypeName>,
        rate_limit_options: Option<RateLimitOptions>,
        tracing_options: Option<TracingOptions>,
        authorizer: Option<Arc<dyn Authorizer>>,
        rate_limiter: Option<Arc<dyn RateLimiter>>,
        trace_provider: Option<Arc<dyn TraceProvider>>,
    ) -> Self {
        Self {
            variables,
            rename_type_names,
            rate_limit_options: rate_limit_options.unwrap_or_default(),
            tracing_options: tracing_options.unwrap_or_default(),
            authorizer,
            rate_limiter,
            trace_provider,
            stats: ResolveStats::default(),
            subgraph_errors: Vec::new(),
        }
    }

    pub(crate) fn append_subgraph_error(&mut self, error: SubgraphError) {
        self.subgraph_errors.push(error);
    }

    /// The fields refused by the authorizer during this request, in
    /// discovery order.
    pub fn subgraph_errors(&self) -> &[SubgraphError] {
        &self.subgraph_errors
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("variables", &self.variables)
            .field("rename_type_names", &self.rename_type_names)
            .field("rate_limit_options", &self.rate_limit_options)
            .field("tracing_options", &self.tracing_options)
            .field("authorizer", &self.authorizer.as_ref().map(|_| "..."))
            .field("rate_limiter", &self.rate_limiter.as_ref().map(|_| "..."))
            .field("trace_provider", &self.trace_provider.as_ref().map(|_| "..."))
            .field("stats", &self.stats)
            .field("subgraph_errors", &self.subgraph_errors)
            .finish()
    }
}
