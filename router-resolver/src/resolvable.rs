//! Resolution of a planned response from raw subgraph data.
//!
//! A [`Resolvable`] owns the per-request JSON store and walks the (plan,
//! data) pair twice. The collect pass validates kinds against the plan, runs
//! field authorization and performs null propagation by rewriting store
//! nodes in place. The emit pass mirrors the plan into an output tree and
//! streams the final `{"errors":...,"data":...,"extensions":...}` document.

use std::io;

use serde_json_bytes::ByteString;
use tower::BoxError;

use crate::authorization::AuthorizationCache;
use crate::authorization::AuthorizationDeny;
use crate::authorization::Authorizer;
use crate::authorization::CachedDecision;
use crate::authorization::GraphCoordinate;
use crate::context::Context;
use crate::context::OperationKind;
use crate::context::RenameTypeName;
use crate::context::SubgraphError;
use crate::json_ext::JsonNode;
use crate::json_ext::JsonStore;
use crate::json_ext::NodeId;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::plan::ArrayNode;
use crate::plan::CustomNode;
use crate::plan::Field;
use crate::plan::FieldInfo;
use crate::plan::LeafNode;
use crate::plan::Node;
use crate::plan::ObjectNode;
use crate::plan::StringNode;

const TYPENAME: &str = "__typename";

/// Marker for a value that failed validation and must bubble to the nearest
/// nullable position.
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct InvalidValue;

type WalkResult = Result<Option<NodeId>, InvalidValue>;

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    /// The initial data, variables or a custom resolver output failed to
    /// parse.
    #[error("invalid JSON document: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The authorizer itself failed; the whole request is aborted.
    #[error("authorization failed: {0}")]
    Authorization(BoxError),

    #[error("failed to write response: {0}")]
    Write(#[from] io::Error),

    #[error("failed to render response extension: {0}")]
    Extension(BoxError),

    /// `resolve` was called before `init`.
    #[error("resolver is not initialized")]
    NotInitialized,
}

/// Where a subscription wrapper document keeps the payload: the resolver
/// extracts the data and errors sub-documents and merges them into its own
/// roots before resolving normally.
#[derive(Debug, Clone, Default)]
pub struct PostProcessingConfiguration {
    pub select_response_data_path: Vec<String>,
    pub select_response_errors_path: Vec<String>,
    pub merge_path: Vec<String>,
}

/// Single-threaded, per-request response resolver. Instances are meant to be
/// pooled: [`Resolvable::reset`] returns one to its initial state.
pub struct Resolvable {
    storage: JsonStore,
    data_root: Option<NodeId>,
    errors_root: Option<NodeId>,
    variables_root: Option<NodeId>,
    print: bool,
    path: Path,
    depth: usize,
    operation_kind: Option<OperationKind>,
    rename_type_names: Vec<RenameTypeName>,
    authorization: AuthorizationCache,
    authorization_buf: Vec<u8>,
    authorization_buf_object: Option<NodeId>,
    authorization_error: Option<BoxError>,
    wrote_errors: bool,
    wrote_data: bool,
}

impl Default for Resolvable {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolvable {
    pub fn new() -> Self {
        Self {
            storage: JsonStore::new(),
            data_root: None,
            errors_root: None,
            variables_root: None,
            print: false,
            path: Path::default(),
            depth: 0,
            operation_kind: None,
            rename_type_names: Vec::new(),
            authorization: AuthorizationCache::new(),
            authorization_buf: Vec::new(),
            authorization_buf_object: None,
            authorization_error: None,
            wrote_errors: false,
            wrote_data: false,
        }
    }

    /// Clears all per-request state. After a reset the instance behaves like
    /// a fresh one.
    pub fn reset(&mut self) {
        self.storage.reset();
        self.data_root = None;
        self.errors_root = None;
        self.variables_root = None;
        self.print = false;
        self.path.truncate(0);
        self.depth = 0;
        self.operation_kind = None;
        self.rename_type_names.clear();
        self.authorization.reset();
        self.authorization_buf.clear();
        self.authorization_buf_object = None;
        self.authorization_error = None;
        self.wrote_errors = false;
        self.wrote_data = false;
    }

    /// Parses `initial_data` into the store and establishes the data root
    /// and an empty errors array. Variables, when present on the context,
    /// are imported for `@skip` / `@include` evaluation.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn init(
        &mut self,
        ctx: &Context,
        initial_data: Option<&[u8]>,
        operation_kind: OperationKind,
    ) -> Result<(), ResolveError> {
        self.operation_kind = Some(operation_kind);
        self.rename_type_names = ctx.rename_type_names.clone();
        let (data, errors) = self.storage.init_resolvable(initial_data)?;
        self.data_root = Some(data);
        self.errors_root = Some(errors);
        if let Some(variables) = &ctx.variables {
            if !variables.is_empty() {
                self.variables_root = Some(self.storage.append_any_json(variables)?);
            }
        }
        Ok(())
    }

    /// Initializes from a subscription wrapper document: the configured
    /// sub-paths locate the payload data and errors, which are merged into
    /// the fresh roots before the normal resolve.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn init_subscription(
        &mut self,
        ctx: &Context,
        initial_data: &[u8],
        post_processing: &PostProcessingConfiguration,
    ) -> Result<(), ResolveError> {
        self.operation_kind = Some(OperationKind::Subscription);
        self.rename_type_names = ctx.rename_type_names.clone();
        if let Some(variables) = &ctx.variables {
            if !variables.is_empty() {
                self.variables_root = Some(self.storage.append_any_json(variables)?);
            }
        }
        let (data, errors) = self.storage.init_resolvable(None)?;
        self.data_root = Some(data);
        self.errors_root = Some(errors);
        let raw = self.storage.append_any_json(initial_data)?;

        let extracted = self
            .storage
            .get(Some(raw), &post_processing.select_response_data_path);
        if self.storage.node_is_defined(extracted) {
            if let Some(source) = extracted {
                self.storage
                    .merge_nodes_with_path(data, source, &post_processing.merge_path);
            }
        }
        let extracted_errors = self
            .storage
            .get(Some(raw), &post_processing.select_response_errors_path);
        if self.storage.node_is_defined(extracted_errors) {
            if let Some(source) = extracted_errors {
                self.storage.merge_arrays(errors, source);
            }
        }
        Ok(())
    }

    /// Marks the value at `path` under the data root as an already-reported
    /// null: it still serializes as `null`, but the non-nullable-field error
    /// it would otherwise raise is suppressed. Fetch layers use this after
    /// reporting a failure for the subtree themselves.
    pub fn mark_null_suppressing_error(&mut self, path: &[String]) -> bool {
        match self.storage.get(self.data_root, path) {
            Some(node) => {
                self.storage.set_null_skip_error(node);
                true
            }
            None => false,
        }
    }

    /// Runs the two-phase walk and writes the GraphQL response document to
    /// `out`.
    ///
    /// Only an authorizer failure, a sink write error or an extension
    /// rendering error is returned as `Err`; every other failure is recorded
    /// in the response's `errors` array with nulls propagated into `data`.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn resolve(
        &mut self,
        ctx: &mut Context,
        root: &ObjectNode,
        fetch_tree: &ObjectNode,
        out: &mut dyn io::Write,
    ) -> Result<(), ResolveError> {
        let data_root = self.data_root.ok_or(ResolveError::NotInitialized)?;
        let errors_root = self.errors_root.ok_or(ResolveError::NotInitialized)?;
        self.print = false;
        self.authorization_error = None;

        let failed = self.walk_object(ctx, root, Some(data_root)).is_err();
        if let Some(error) = self.authorization_error.take() {
            return Err(ResolveError::Authorization(error));
        }

        let mut writer = ResponseWriter::new(out);
        writer.print_bytes(b"{");
        if self.has_errors() {
            writer.print_bytes(b"\"errors\":");
            writer.print_node(&self.storage, errors_root);
            writer.print_bytes(b",");
            self.wrote_errors = true;
        }
        if failed {
            writer.print_bytes(b"\"data\":null");
        } else {
            writer.print_bytes(b"\"data\":");
            self.print = true;
            let resolved = self
                .walk_object(ctx, root, Some(data_root))
                .unwrap_or_default();
            self.print = false;
            match resolved {
                Some(id) => writer.print_node(&self.storage, id),
                None => writer.print_bytes(b"null"),
            }
            self.wrote_data = true;
        }
        let mut extension_error = None;
        if self.has_extensions(ctx) {
            writer.print_bytes(b",");
            if let Err(error) = self.print_extensions(ctx, fetch_tree, &mut writer) {
                extension_error = Some(error);
            }
        }
        writer.print_bytes(b"}");

        if let Some(error) = writer.err {
            return Err(ResolveError::Write(error));
        }
        if let Some(error) = extension_error {
            return Err(error);
        }
        Ok(())
    }

    /// True once the final document contained errors but `data` was rendered
    /// as `null` because the failure reached the root.
    pub fn wrote_errors_without_data(&self) -> bool {
        self.wrote_errors && !self.wrote_data
    }

    /// The data root holds a non-empty object.
    pub fn has_data(&self) -> bool {
        match self.data_root {
            Some(data) => {
                matches!(self.storage.node(data), JsonNode::Object(_))
                    && !self.storage.object_is_empty(data)
            }
            None => false,
        }
    }

    fn has_errors(&self) -> bool {
        match self.errors_root {
            Some(errors) => !self.storage.array_values(errors).is_empty(),
            None => false,
        }
    }

    fn has_extensions(&self, ctx: &Context) -> bool {
        if let Some(authorizer) = &ctx.authorizer {
            if authorizer.has_response_extension_data(ctx) {
                return true;
            }
        }
        if ctx.rate_limit_options.enabled
            && ctx.rate_limit_options.include_stats_in_response_extension
            && ctx.rate_limiter.is_some()
        {
            return true;
        }
        ctx.tracing_options.enabled
            && ctx.tracing_options.include_trace_output_in_response_extensions
            && ctx.trace_provider.is_some()
    }

    fn print_extensions(
        &mut self,
        ctx: &Context,
        fetch_tree: &ObjectNode,
        writer: &mut ResponseWriter<'_>,
    ) -> Result<(), ResolveError> {
        writer.print_bytes(b"\"extensions\":{");
        let mut write_comma = false;
        if let Some(authorizer) = &ctx.authorizer {
            if authorizer.has_response_extension_data(ctx) {
                write_comma = true;
                writer.print_bytes(b"\"authorization\":");
                if writer.err.is_none() {
                    authorizer
                        .render_response_extension(ctx, &mut *writer.out)
                        .map_err(ResolveError::Extension)?;
                }
            }
        }
        if ctx.rate_limit_options.enabled && ctx.rate_limit_options.include_stats_in_response_extension
        {
            if let Some(rate_limiter) = &ctx.rate_limiter {
                if write_comma {
                    writer.print_bytes(b",");
                }
                write_comma = true;
                writer.print_bytes(b"\"rateLimit\":");
                if writer.err.is_none() {
                    rate_limiter
                        .render_response_extension(ctx, &mut *writer.out)
                        .map_err(ResolveError::Extension)?;
                }
            }
        }
        if ctx.tracing_options.enabled
            && ctx.tracing_options.include_trace_output_in_response_extensions
        {
            if let Some(trace_provider) = &ctx.trace_provider {
                if write_comma {
                    writer.print_bytes(b",");
                }
                writer.print_bytes(b"\"trace\":");
                let trace = trace_provider.get_trace(ctx, fetch_tree, ctx.tracing_options.debug);
                if writer.err.is_none() {
                    serde_json::to_writer(&mut *writer.out, &trace)
                        .map_err(|error| ResolveError::Extension(Box::new(error)))?;
                }
            }
        }
        writer.print_bytes(b"}");
        Ok(())
    }

    fn walk_node(&mut self, ctx: &mut Context, node: &Node, data: Option<NodeId>) -> WalkResult {
        if self.authorization_error.is_some() {
            return Err(InvalidValue);
        }
        if self.print {
            ctx.stats.resolved_nodes += 1;
        }
        match node {
            Node::Object(object) => self.walk_object(ctx, object, data),
            Node::Array(array) => self.walk_array(ctx, array, data),
            Node::Null => self.walk_null(ctx),
            Node::String(string) => self.walk_string(ctx, string, data),
            Node::Boolean(leaf) => self.walk_boolean(ctx, leaf, data),
            Node::Integer(leaf) => self.walk_integer(ctx, leaf, data),
            Node::Float(leaf) => self.walk_float(ctx, leaf, data),
            Node::BigInt(leaf) => self.walk_big_int(ctx, leaf, data),
            Node::Scalar(leaf) => self.walk_scalar(ctx, leaf, data),
            Node::EmptyObject => self.walk_empty_object(),
            Node::EmptyArray => self.walk_empty_array(),
            Node::Custom(custom) => self.walk_custom(ctx, custom, data),
        }
    }

    fn walk_object(&mut self, ctx: &mut Context, obj: &ObjectNode, data: Option<NodeId>) -> WalkResult {
        let resolved = self.storage.get(data, &obj.path);
        if !self.storage.node_is_defined(resolved) {
            if obj.nullable {
                return self.walk_null(ctx);
            }
            self.add_non_nullable_field_error(resolved, &obj.path);
            return Err(InvalidValue);
        }
        let Some(object) = resolved else {
            return Err(InvalidValue);
        };
        self.push_node_path(&obj.path);
        let result = self.walk_object_fields(ctx, obj, object);
        self.pop_node_path(&obj.path);
        result
    }

    fn walk_object_fields(&mut self, ctx: &mut Context, obj: &ObjectNode, object: NodeId) -> WalkResult {
        let is_root = self.depth < 2;
        if !matches!(self.storage.node(object), JsonNode::Object(_)) {
            self.add_error("Object cannot represent non-object value.", &[]);
            return Err(InvalidValue);
        }

        let output = if self.print {
            if !is_root {
                ctx.stats.resolved_objects += 1;
            }
            Some(self.storage.append_empty_object())
        } else {
            None
        };

        for field in &obj.fields {
            if let Some(variable_name) = &field.skip_variable_name {
                if self.skip_field(variable_name) {
                    continue;
                }
            }
            if let Some(variable_name) = &field.include_variable_name {
                if self.exclude_field(variable_name) {
                    continue;
                }
            }
            if let Some(on_type_names) = &field.on_type_names {
                if self.skip_field_on_type_names(object, on_type_names) {
                    continue;
                }
            }
            if !self.print && self.authorize_field(ctx, object, field) {
                if field.value.nullable() {
                    // The deny error is already recorded; only the value
                    // goes to null.
                    if let Some(value) = self.storage.get(Some(object), field.value.path()) {
                        self.storage.set_null(value);
                    }
                    continue;
                }
                if obj.nullable {
                    self.storage.set_null(object);
                    return Ok(None);
                }
                return Err(InvalidValue);
            }

            match self.walk_node(ctx, &field.value, Some(object)) {
                Ok(child) => {
                    if let (Some(output), Some(child)) = (output, child) {
                        self.storage.set_object_field(output, field.name.clone(), child);
                    }
                }
                Err(InvalidValue) => {
                    if obj.nullable {
                        // Null the data node so the emit pass short-circuits
                        // here.
                        self.storage.set_null(object);
                        if self.print {
                            return self.walk_null(ctx);
                        }
                        return Ok(None);
                    }
                    return Err(InvalidValue);
                }
            }
        }

        Ok(output)
    }

    fn walk_array(&mut self, ctx: &mut Context, arr: &ArrayNode, data: Option<NodeId>) -> WalkResult {
        let resolved = self.storage.get(data, &arr.path);
        if !self.storage.node_is_defined(resolved) {
            if arr.nullable {
                return self.walk_null(ctx);
            }
            self.add_non_nullable_field_error(resolved, &arr.path);
            return Err(InvalidValue);
        }
        let Some(array) = resolved else {
            return Err(InvalidValue);
        };
        self.push_node_path(&arr.path);
        let result = self.walk_array_items(ctx, arr, array);
        self.pop_node_path(&arr.path);
        result
    }

    fn walk_array_items(&mut self, ctx: &mut Context, arr: &ArrayNode, array: NodeId) -> WalkResult {
        if !matches!(self.storage.node(array), JsonNode::Array(_)) {
            self.add_error("Array cannot represent non-array value.", &[]);
            return Err(InvalidValue);
        }

        let output = if self.print {
            Some(self.storage.append_empty_array())
        } else {
            None
        };

        let values = self.storage.array_values(array).to_vec();
        for (index, value) in values.into_iter().enumerate() {
            self.push_array_index(index);
            let result = self.walk_node(ctx, &arr.item, Some(value));
            self.pop_array_index();
            match result {
                Ok(child) => {
                    if let (Some(output), Some(child)) = (output, child) {
                        self.storage.array_push(output, child);
                    }
                }
                Err(InvalidValue) => {
                    if arr.nullable {
                        self.storage.set_null(array);
                        if self.print {
                            return self.walk_null(ctx);
                        }
                        return Ok(None);
                    }
                    return Err(InvalidValue);
                }
            }
        }

        Ok(output)
    }

    fn walk_null(&mut self, ctx: &mut Context) -> WalkResult {
        if self.print {
            ctx.stats.resolved_leafs += 1;
            return Ok(Some(self.storage.append_null()));
        }
        Ok(None)
    }

    fn walk_string(&mut self, ctx: &mut Context, string: &StringNode, data: Option<NodeId>) -> WalkResult {
        if self.print {
            ctx.stats.resolved_leafs += 1;
        }
        let resolved = self.storage.get(data, &string.path);
        if !self.storage.node_is_defined(resolved) {
            if string.nullable {
                return self.walk_null(ctx);
            }
            self.add_non_nullable_field_error(resolved, &string.path);
            return Err(InvalidValue);
        }
        let Some(value) = resolved else {
            return Err(InvalidValue);
        };
        let content = match self.storage.node(value) {
            JsonNode::String(content) => content.clone(),
            _ => {
                let text = self.storage.node_value_text(value);
                self.add_error(
                    &format!("String cannot represent non-string value: \"{text}\""),
                    &string.path,
                );
                return Err(InvalidValue);
            }
        };
        if !self.print {
            return Ok(None);
        }
        if string.is_typename {
            let renamed = self
                .rename_type_names
                .iter()
                .find(|rename| rename.from == content)
                .map(|rename| rename.to.clone());
            if let Some(to) = renamed {
                return Ok(Some(self.storage.append_string(to)));
            }
            return Ok(Some(self.storage.copy_node(value)));
        }
        if string.unescape_response_json {
            // Only embed the content as JSON if it actually parses;
            // otherwise it stays a string.
            return match serde_json::from_str::<serde_json::Value>(content.as_str()) {
                Ok(parsed) => Ok(Some(self.storage.import_value(parsed))),
                Err(_) => Ok(Some(self.storage.append_string(content))),
            };
        }
        Ok(Some(self.storage.copy_node(value)))
    }

    fn walk_boolean(&mut self, ctx: &mut Context, leaf: &LeafNode, data: Option<NodeId>) -> WalkResult {
        if self.print {
            ctx.stats.resolved_leafs += 1;
        }
        let resolved = self.storage.get(data, &leaf.path);
        if !self.storage.node_is_defined(resolved) {
            if leaf.nullable {
                return self.walk_null(ctx);
            }
            self.add_non_nullable_field_error(resolved, &leaf.path);
            return Err(InvalidValue);
        }
        let Some(value) = resolved else {
            return Err(InvalidValue);
        };
        if !matches!(self.storage.node(value), JsonNode::Bool(_)) {
            let text = self.storage.node_value_text(value);
            self.add_error(
                &format!("Bool cannot represent non-boolean value: \"{text}\""),
                &leaf.path,
            );
            return Err(InvalidValue);
        }
        if self.print {
            return Ok(Some(self.storage.copy_node(value)));
        }
        Ok(None)
    }

    fn walk_integer(&mut self, ctx: &mut Context, leaf: &LeafNode, data: Option<NodeId>) -> WalkResult {
        if self.print {
            ctx.stats.resolved_leafs += 1;
        }
        let resolved = self.storage.get(data, &leaf.path);
        if !self.storage.node_is_defined(resolved) {
            if leaf.nullable {
                return self.walk_null(ctx);
            }
            self.add_non_nullable_field_error(resolved, &leaf.path);
            return Err(InvalidValue);
        }
        let Some(value) = resolved else {
            return Err(InvalidValue);
        };
        if !matches!(self.storage.node(value), JsonNode::Number(_)) {
            let text = self.storage.node_value_text(value);
            self.add_error(
                &format!("Int cannot represent non-integer value: \"{text}\""),
                &leaf.path,
            );
            return Err(InvalidValue);
        }
        if self.print {
            return Ok(Some(self.storage.copy_node(value)));
        }
        Ok(None)
    }

    fn walk_float(&mut self, ctx: &mut Context, leaf: &LeafNode, data: Option<NodeId>) -> WalkResult {
        if self.print {
            ctx.stats.resolved_leafs += 1;
        }
        let resolved = self.storage.get(data, &leaf.path);
        if !self.storage.node_is_defined(resolved) {
            if leaf.nullable {
                return self.walk_null(ctx);
            }
            self.add_non_nullable_field_error(resolved, &leaf.path);
            return Err(InvalidValue);
        }
        let Some(value) = resolved else {
            return Err(InvalidValue);
        };
        if !matches!(self.storage.node(value), JsonNode::Number(_)) {
            let text = self.storage.node_value_text(value);
            self.add_error(
                &format!("Float cannot represent non-float value: \"{text}\""),
                &leaf.path,
            );
            return Err(InvalidValue);
        }
        if self.print {
            return Ok(Some(self.storage.copy_node(value)));
        }
        Ok(None)
    }

    /// BigInt passes the numeric representation through untouched: no kind
    /// narrowing, no range coercion.
    fn walk_big_int(&mut self, ctx: &mut Context, leaf: &LeafNode, data: Option<NodeId>) -> WalkResult {
        if self.print {
            ctx.stats.resolved_leafs += 1;
        }
        let resolved = self.storage.get(data, &leaf.path);
        if !self.storage.node_is_defined(resolved) {
            if leaf.nullable {
                return self.walk_null(ctx);
            }
            self.add_non_nullable_field_error(resolved, &leaf.path);
            return Err(InvalidValue);
        }
        let Some(value) = resolved else {
            return Err(InvalidValue);
        };
        if self.print {
            return Ok(Some(self.storage.copy_node(value)));
        }
        Ok(None)
    }

    /// Scalars accept any value; non-primitives are re-embedded as JSON.
    fn walk_scalar(&mut self, ctx: &mut Context, leaf: &LeafNode, data: Option<NodeId>) -> WalkResult {
        if self.print {
            ctx.stats.resolved_leafs += 1;
        }
        let resolved = self.storage.get(data, &leaf.path);
        if !self.storage.node_is_defined(resolved) {
            if leaf.nullable {
                return self.walk_null(ctx);
            }
            self.add_non_nullable_field_error(resolved, &leaf.path);
            return Err(InvalidValue);
        }
        let Some(value) = resolved else {
            return Err(InvalidValue);
        };
        if self.print {
            return Ok(Some(self.storage.copy_node(value)));
        }
        Ok(None)
    }

    fn walk_empty_object(&mut self) -> WalkResult {
        if self.print {
            return Ok(Some(self.storage.append_empty_object()));
        }
        Ok(None)
    }

    fn walk_empty_array(&mut self) -> WalkResult {
        if self.print {
            return Ok(Some(self.storage.append_empty_array()));
        }
        Ok(None)
    }

    fn walk_custom(&mut self, ctx: &mut Context, custom: &CustomNode, data: Option<NodeId>) -> WalkResult {
        if self.print {
            ctx.stats.resolved_leafs += 1;
        }
        let resolved = self.storage.get(data, &custom.path);
        if !self.storage.node_is_defined(resolved) {
            if custom.nullable {
                return self.walk_null(ctx);
            }
            self.add_non_nullable_field_error(resolved, &custom.path);
            return Err(InvalidValue);
        }
        let Some(value) = resolved else {
            return Err(InvalidValue);
        };
        let input = self.storage.node_value_text(value);
        let resolved_bytes = match custom.resolver.resolve(ctx, input.as_bytes()) {
            Ok(bytes) => bytes,
            Err(error) => {
                self.add_error(&error.to_string(), &custom.path);
                return Err(InvalidValue);
            }
        };
        if !self.print {
            return Ok(None);
        }
        match self.storage.append_any_json(&resolved_bytes) {
            Ok(id) => Ok(Some(id)),
            Err(error) => {
                self.add_error(&error.to_string(), &custom.path);
                Err(InvalidValue)
            }
        }
    }

    /// Returns true when the field must be skipped because the authorizer
    /// rejected it, or because the authorizer itself failed (which aborts
    /// the walk via `authorization_error`).
    fn authorize_field(&mut self, ctx: &mut Context, object: NodeId, field: &Field) -> bool {
        let Some(info) = &field.info else {
            return false;
        };
        if !info.has_authorization_rule {
            return false;
        }
        let Some(authorizer) = ctx.authorizer.clone() else {
            return false;
        };
        let Some(data_source_id) = info.source.ids.first() else {
            return false;
        };
        let coordinate = GraphCoordinate {
            type_name: self.object_field_type_name(object, info),
            field_name: field.name.as_str().to_string(),
        };
        match self.authorize(ctx, authorizer.as_ref(), object, data_source_id, &coordinate) {
            Err(error) => {
                self.authorization_error = Some(error);
                true
            }
            Ok(Some(deny)) => {
                self.add_reject_field_error(ctx, deny.reason, data_source_id, field);
                true
            }
            Ok(None) => false,
        }
    }

    fn authorize(
        &mut self,
        ctx: &Context,
        authorizer: &dyn Authorizer,
        object: NodeId,
        data_source_id: &str,
        coordinate: &GraphCoordinate,
    ) -> Result<Option<AuthorizationDeny>, BoxError> {
        let key = self.authorization.decision_key(data_source_id, coordinate);
        match self.authorization.get(key) {
            Some(CachedDecision::Allow) => {
                tracing::trace!(%coordinate, "authorization cache hit: allow");
                return Ok(None);
            }
            Some(CachedDecision::Deny(reason)) => {
                tracing::trace!(%coordinate, "authorization cache hit: deny");
                return Ok(Some(AuthorizationDeny { reason }));
            }
            None => {}
        }
        if self.authorization_buf_object != Some(object) {
            self.authorization_buf.clear();
            self.storage
                .print_object_flat(object, &mut self.authorization_buf)?;
            self.authorization_buf_object = Some(object);
        }
        let decision = authorizer.authorize_object_field(
            ctx,
            data_source_id,
            &self.authorization_buf,
            coordinate,
        )?;
        self.authorization.insert(key, decision.as_ref());
        Ok(decision)
    }

    fn object_field_type_name(&self, object: NodeId, info: &FieldInfo) -> String {
        if let Some(typename) = self.storage.get_object_field(Some(object), TYPENAME) {
            if let Some(name) = self.storage.as_str(typename) {
                return name.to_string();
            }
        }
        info.exact_parent_type_name.clone()
    }

    fn add_reject_field_error(
        &mut self,
        ctx: &mut Context,
        reason: Option<String>,
        data_source_id: &str,
        field: &Field,
    ) {
        let node_path = field.value.path();
        self.push_node_path(node_path);
        let field_path = self.render_field_path();
        let message = match &reason {
            Some(reason) if !reason.is_empty() => {
                format!("Unauthorized to load field '{field_path}', Reason: {reason}.")
            }
            _ => format!("Unauthorized to load field '{field_path}'."),
        };
        ctx.append_subgraph_error(SubgraphError {
            data_source_id: data_source_id.to_string(),
            field_path: field_path.clone(),
            reason: reason.filter(|reason| !reason.is_empty()),
        });
        let error = self.storage.append_error_with_message(&message, &self.path);
        if let Some(errors_root) = self.errors_root {
            self.storage.array_push(errors_root, error);
        }
        self.pop_node_path(node_path);
    }

    fn skip_field_on_type_names(&self, object: NodeId, on_type_names: &[ByteString]) -> bool {
        let Some(typename) = self.storage.get_object_field(Some(object), TYPENAME) else {
            return true;
        };
        let Some(name) = self.storage.as_str(typename) else {
            return true;
        };
        !on_type_names
            .iter()
            .any(|candidate| candidate.as_str() == name)
    }

    fn skip_field(&self, variable_name: &str) -> bool {
        let Some(variable) = self.storage.get_object_field(self.variables_root, variable_name)
        else {
            return false;
        };
        matches!(self.storage.node(variable), JsonNode::Bool(true))
    }

    /// A field behind `@include` survives only when the variable is
    /// literally `true`: missing, non-boolean and `false` all exclude it.
    fn exclude_field(&self, variable_name: &str) -> bool {
        let Some(variable) = self.storage.get_object_field(self.variables_root, variable_name)
        else {
            return true;
        };
        !matches!(self.storage.node(variable), JsonNode::Bool(true))
    }

    fn add_non_nullable_field_error(&mut self, field_ref: Option<NodeId>, field_path: &[String]) {
        if let Some(id) = field_ref {
            // A failure higher up already produced an error for this
            // subtree.
            if matches!(self.storage.node(id), JsonNode::NullSkipError) {
                return;
            }
        }
        self.push_node_path(field_path);
        let rendered = self.render_field_path();
        let error = self
            .storage
            .append_non_nullable_field_is_null_error(&rendered, &self.path);
        if let Some(errors_root) = self.errors_root {
            self.storage.array_push(errors_root, error);
        }
        self.pop_node_path(field_path);
    }

    fn add_error(&mut self, message: &str, field_path: &[String]) {
        self.push_node_path(field_path);
        let error = self.storage.append_error_with_message(message, &self.path);
        if let Some(errors_root) = self.errors_root {
            self.storage.array_push(errors_root, error);
        }
        self.pop_node_path(field_path);
    }

    fn push_node_path(&mut self, segments: &[String]) {
        self.depth += 1;
        for segment in segments {
            self.path.push(PathElement::Key(segment.clone()));
        }
    }

    fn pop_node_path(&mut self, segments: &[String]) {
        self.path.truncate(self.path.len() - segments.len());
        self.depth -= 1;
    }

    fn push_array_index(&mut self, index: usize) {
        self.path.push(PathElement::Index(index));
    }

    fn pop_array_index(&mut self) {
        self.path.pop();
    }

    /// Renders the dotted schema position of the current path, e.g.
    /// `Query.me.reviews.product.upc`, for human-readable error messages.
    fn render_field_path(&self) -> String {
        let mut out = String::new();
        if let Some(kind) = self.operation_kind {
            out.push_str(kind.default_type_name());
        }
        for element in self.path.iter() {
            if let PathElement::Key(key) = element {
                out.push('.');
                out.push_str(key);
            }
        }
        out
    }
}

/// Write sink with error latching: after the first failed write every
/// subsequent write is a no-op and the stored error is surfaced once the
/// document is complete.
struct ResponseWriter<'a> {
    out: &'a mut dyn io::Write,
    err: Option<io::Error>,
}

impl<'a> ResponseWriter<'a> {
    fn new(out: &'a mut dyn io::Write) -> Self {
        Self { out, err: None }
    }

    fn print_bytes(&mut self, bytes: &[u8]) {
        if self.err.is_some() {
            return;
        }
        if let Err(error) = self.out.write_all(bytes) {
            self.err = Some(error);
        }
    }

    fn print_node(&mut self, storage: &JsonStore, id: NodeId) {
        if self.err.is_some() {
            return;
        }
        if let Err(error) = storage.print_node(id, &mut *self.out) {
            self.err = Some(error);
        }
    }
}
