//! Resolution and shaping of federated GraphQL responses.
//!
//! This crate is the response side of a federated gateway: it consumes raw
//! JSON already fetched from upstream subgraphs together with a typed
//! response plan, enforces the GraphQL type system on the received data
//! (kind checks, null propagation, abstract type dispatch), runs field-level
//! authorization with per-request decision caching, and serializes the final
//! `{"errors":...,"data":...,"extensions":...}` document in a single pass.
//!
//! Query parsing, planning, subgraph fetching and transport live elsewhere;
//! the seams to those collaborators are the [`plan`] module and the traits
//! on [`Context`].

mod authorization;
mod context;
mod json_ext;
pub mod plan;
mod resolvable;

pub use authorization::AuthorizationDeny;
pub use authorization::Authorizer;
pub use authorization::GraphCoordinate;
pub use authorization::RateLimiter;
pub use context::Context;
pub use context::OperationKind;
pub use context::RateLimitOptions;
pub use context::RenameTypeName;
pub use context::ResolveStats;
pub use context::SubgraphError;
pub use context::TraceProvider;
pub use context::TracingOptions;
pub use json_ext::Path;
pub use json_ext::PathElement;
pub use resolvable::PostProcessingConfiguration;
pub use resolvable::Resolvable;
pub use resolvable::ResolveError;
