//! The response plan AST.
//!
//! A plan describes the shape the client expects: a static tree derived from
//! the query and the schema by the planner, consumed read-only by the
//! resolver. Plan nodes are a closed sum type; the walker is a single
//! function dispatching on the variant.

use std::fmt;
use std::sync::Arc;

use serde_json_bytes::ByteString;
use tower::BoxError;

use crate::context::Context;

/// A node of the response plan.
#[derive(Debug)]
pub enum Node {
    Object(Box<ObjectNode>),
    Array(Box<ArrayNode>),
    Null,
    String(StringNode),
    Boolean(LeafNode),
    Integer(LeafNode),
    Float(LeafNode),
    BigInt(LeafNode),
    Scalar(LeafNode),
    EmptyObject,
    EmptyArray,
    Custom(CustomNode),
}

impl Default for Node {
    fn default() -> Self {
        Node::Null
    }
}

impl Node {
    /// The data path this node reads from, relative to its parent object.
    pub(crate) fn path(&self) -> &[String] {
        match self {
            Node::Object(node) => &node.path,
            Node::Array(node) => &node.path,
            Node::String(node) => &node.path,
            Node::Boolean(node)
            | Node::Integer(node)
            | Node::Float(node)
            | Node::BigInt(node)
            | Node::Scalar(node) => &node.path,
            Node::Custom(node) => &node.path,
            Node::Null | Node::EmptyObject | Node::EmptyArray => &[],
        }
    }

    pub(crate) fn nullable(&self) -> bool {
        match self {
            Node::Object(node) => node.nullable,
            Node::Array(node) => node.nullable,
            Node::String(node) => node.nullable,
            Node::Boolean(node)
            | Node::Integer(node)
            | Node::Float(node)
            | Node::BigInt(node)
            | Node::Scalar(node) => node.nullable,
            Node::Custom(node) => node.nullable,
            Node::Null => true,
            Node::EmptyObject | Node::EmptyArray => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ObjectNode {
    pub path: Vec<String>,
    pub nullable: bool,
    pub fields: Vec<Field>,
}

#[derive(Debug, Default)]
pub struct ArrayNode {
    pub path: Vec<String>,
    pub nullable: bool,
    pub item: Node,
}

#[derive(Debug, Default)]
pub struct StringNode {
    pub path: Vec<String>,
    pub nullable: bool,
    /// The value is a `__typename`; rename rules apply on emit.
    pub is_typename: bool,
    /// If the value holds embedded JSON, re-emit it as JSON instead of a
    /// string.
    pub unescape_response_json: bool,
}

/// Shape shared by the leaf variants that only need a location and a
/// nullability flag.
#[derive(Debug, Default)]
pub struct LeafNode {
    pub path: Vec<String>,
    pub nullable: bool,
}

/// A leaf resolved by user code: the raw bytes at `path` go in, raw JSON
/// comes out and is embedded in the response.
pub struct CustomNode {
    pub path: Vec<String>,
    pub nullable: bool,
    pub resolver: Arc<dyn CustomResolve>,
}

impl fmt::Debug for CustomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomNode")
            .field("path", &self.path)
            .field("nullable", &self.nullable)
            .finish_non_exhaustive()
    }
}

pub trait CustomResolve: Send + Sync {
    fn resolve(&self, ctx: &Context, value: &[u8]) -> Result<Vec<u8>, BoxError>;
}

/// A field of an [`ObjectNode`].
#[derive(Debug)]
pub struct Field {
    /// The response key. Output objects are keyed by plan field names, not
    /// by the keys found in the data.
    pub name: ByteString,
    pub value: Node,
    /// `@skip(if: $var)`: the field is skipped when the variable is
    /// literally `true`.
    pub skip_variable_name: Option<String>,
    /// `@include(if: $var)`: the field is kept only when the variable is
    /// literally `true`.
    pub include_variable_name: Option<String>,
    /// Type conditions: the field applies only when the parent object's
    /// `__typename` is one of these.
    pub on_type_names: Option<Vec<ByteString>>,
    pub info: Option<FieldInfo>,
}

impl Default for Field {
    fn default() -> Self {
        Field {
            name: ByteString::from(""),
            value: Node::default(),
            skip_variable_name: None,
            include_variable_name: None,
            on_type_names: None,
            info: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FieldInfo {
    /// The parent type as declared in the schema, used when the data has no
    /// usable `__typename`.
    pub exact_parent_type_name: String,
    pub source: FieldSource,
    pub has_authorization_rule: bool,
}

/// The datasources a field is fetched from.
#[derive(Debug, Default)]
pub struct FieldSource {
    pub ids: Vec<String>,
}
