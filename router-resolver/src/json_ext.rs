//! Performance oriented JSON manipulation.
//!
//! Subgraph payloads are parsed once into an index-addressed node store and
//! never copied back out: the walker reads, mutates and extends the same
//! store, and the final response is printed from it in a single pass.

use std::fmt;
use std::io;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;

/// Reference to a node inside a [`JsonStore`]. Only meaningful for the store
/// that produced it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct NodeId(usize);

/// A single JSON node. Children are referenced by [`NodeId`], so rewriting a
/// node in place (e.g. to `Null` during null propagation) never invalidates
/// the rest of the tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum JsonNode {
    /// Fields in insertion order. Clients rely on GraphQL field ordering.
    Object(Vec<(ByteString, NodeId)>),
    Array(Vec<NodeId>),
    String(ByteString),
    /// The raw number token as it appeared in the input, so printing is
    /// byte-faithful and big integers survive without range coercion.
    Number(ByteString),
    Bool(bool),
    Null,
    /// Serializes as `null` but suppresses the non-nullable-field error that
    /// a plain `Null` would trigger: the failure that produced it has already
    /// been reported for this subtree.
    NullSkipError,
}

impl JsonNode {
    pub(crate) fn is_primitive(&self) -> bool {
        !matches!(self, JsonNode::Object(_) | JsonNode::Array(_))
    }
}

#[derive(Debug, Default)]
pub(crate) struct JsonStore {
    nodes: Vec<JsonNode>,
}

impl JsonStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Drops all nodes but keeps the allocation for reuse.
    pub(crate) fn reset(&mut self) {
        self.nodes.clear();
    }

    pub(crate) fn node(&self, id: NodeId) -> &JsonNode {
        &self.nodes[id.0]
    }

    fn push(&mut self, node: JsonNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Sets up the two roots every request starts from: the data root
    /// (parsed from `initial_data`, or an empty object) and an empty errors
    /// array.
    pub(crate) fn init_resolvable(
        &mut self,
        initial_data: Option<&[u8]>,
    ) -> Result<(NodeId, NodeId), serde_json::Error> {
        let data = match initial_data {
            Some(bytes) if !bytes.is_empty() => self.append_any_json(bytes)?,
            _ => self.append_empty_object(),
        };
        let errors = self.append_empty_array();
        Ok((data, errors))
    }

    pub(crate) fn append_any_json(&mut self, bytes: &[u8]) -> Result<NodeId, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        Ok(self.import_value(value))
    }

    pub(crate) fn import_value(&mut self, value: serde_json::Value) -> NodeId {
        let node = match value {
            serde_json::Value::Null => JsonNode::Null,
            serde_json::Value::Bool(b) => JsonNode::Bool(b),
            serde_json::Value::Number(n) => JsonNode::Number(ByteString::from(n.to_string())),
            serde_json::Value::String(s) => JsonNode::String(ByteString::from(s)),
            serde_json::Value::Array(values) => {
                let children = values
                    .into_iter()
                    .map(|v| self.import_value(v))
                    .collect::<Vec<_>>();
                JsonNode::Array(children)
            }
            serde_json::Value::Object(map) => {
                let fields = map
                    .into_iter()
                    .map(|(k, v)| {
                        let child = self.import_value(v);
                        (ByteString::from(k), child)
                    })
                    .collect::<Vec<_>>();
                JsonNode::Object(fields)
            }
        };
        self.push(node)
    }

    pub(crate) fn append_empty_object(&mut self) -> NodeId {
        self.push(JsonNode::Object(Vec::new()))
    }

    pub(crate) fn append_empty_array(&mut self) -> NodeId {
        self.push(JsonNode::Array(Vec::new()))
    }

    pub(crate) fn append_null(&mut self) -> NodeId {
        self.push(JsonNode::Null)
    }

    /// Rewrites a node to the error-suppressing null in place.
    pub(crate) fn set_null_skip_error(&mut self, id: NodeId) {
        self.nodes[id.0] = JsonNode::NullSkipError;
    }

    pub(crate) fn append_string(&mut self, value: impl Into<ByteString>) -> NodeId {
        self.push(JsonNode::String(value.into()))
    }

    fn append_number_raw(&mut self, token: impl Into<ByteString>) -> NodeId {
        self.push(JsonNode::Number(token.into()))
    }

    /// Appends a shallow clone of `id`. Children stay shared with the source
    /// subtree, which is safe because the walker only rewrites nodes during
    /// the collect phase, before any copies are taken.
    pub(crate) fn copy_node(&mut self, id: NodeId) -> NodeId {
        let node = self.nodes[id.0].clone();
        self.push(node)
    }

    /// `None`, `null` and the error-suppressing null all count as undefined:
    /// a missing value and an explicit null follow the same nullability
    /// rules.
    pub(crate) fn node_is_defined(&self, id: Option<NodeId>) -> bool {
        match id {
            Some(id) => !matches!(
                self.nodes[id.0],
                JsonNode::Null | JsonNode::NullSkipError
            ),
            None => false,
        }
    }

    /// Follows a chain of object field lookups. Returns `None` as soon as a
    /// step is missing or the current node is not an object.
    pub(crate) fn get(&self, id: Option<NodeId>, path: &[String]) -> Option<NodeId> {
        let mut current = id?;
        for segment in path {
            let JsonNode::Object(fields) = &self.nodes[current.0] else {
                return None;
            };
            current = fields
                .iter()
                .find(|(key, _)| key.as_str() == segment.as_str())
                .map(|(_, child)| *child)?;
        }
        Some(current)
    }

    pub(crate) fn get_object_field(&self, id: Option<NodeId>, key: &str) -> Option<NodeId> {
        let id = id?;
        let JsonNode::Object(fields) = &self.nodes[id.0] else {
            return None;
        };
        fields
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, child)| *child)
    }

    pub(crate) fn as_str(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0] {
            JsonNode::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Rewrites a node to `Null` in place, used to bubble a failure up to
    /// the nearest nullable position.
    pub(crate) fn set_null(&mut self, id: NodeId) {
        self.nodes[id.0] = JsonNode::Null;
    }

    /// Inserts or overwrites an object field, preserving the position of an
    /// existing key.
    pub(crate) fn set_object_field(&mut self, object: NodeId, key: ByteString, value: NodeId) {
        let JsonNode::Object(fields) = &mut self.nodes[object.0] else {
            return;
        };
        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => fields.push((key, value)),
        }
    }

    pub(crate) fn array_push(&mut self, array: NodeId, value: NodeId) {
        if let JsonNode::Array(values) = &mut self.nodes[array.0] {
            values.push(value);
        }
    }

    pub(crate) fn array_values(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0] {
            JsonNode::Array(values) => values,
            _ => &[],
        }
    }

    pub(crate) fn object_is_empty(&self, id: NodeId) -> bool {
        match &self.nodes[id.0] {
            JsonNode::Object(fields) => fields.is_empty(),
            _ => true,
        }
    }

    /// Shallow merge of object `b` into object `a`; `b`'s keys overwrite.
    /// If either side is not a defined object, `b` wins.
    pub(crate) fn merge_nodes(&mut self, a: Option<NodeId>, b: NodeId) -> NodeId {
        let Some(a) = a else {
            return b;
        };
        if !self.node_is_defined(Some(a)) || !self.node_is_defined(Some(b)) {
            return b;
        }
        if !matches!(self.nodes[a.0], JsonNode::Object(_))
            || !matches!(self.nodes[b.0], JsonNode::Object(_))
        {
            return b;
        }
        let b_fields = match &mut self.nodes[b.0] {
            JsonNode::Object(fields) => std::mem::take(fields),
            _ => unreachable!("kind checked above"),
        };
        for (key, value) in b_fields {
            self.set_object_field(a, key, value);
        }
        a
    }

    /// Merges `source` into `target` at `path`, creating intermediate
    /// objects as needed.
    pub(crate) fn merge_nodes_with_path(
        &mut self,
        target: NodeId,
        source: NodeId,
        path: &[String],
    ) {
        let mut current = target;
        for segment in path {
            current = match self.get_object_field(Some(current), segment) {
                Some(child) => child,
                None => {
                    let child = self.append_empty_object();
                    self.set_object_field(current, ByteString::from(segment.as_str()), child);
                    child
                }
            };
        }
        let merged = self.merge_nodes(Some(current), source);
        if merged != current {
            self.nodes[current.0] = self.nodes[merged.0].clone();
        }
    }

    /// Appends `b`'s values onto array `a`.
    pub(crate) fn merge_arrays(&mut self, a: NodeId, b: NodeId) {
        let b_values = match &mut self.nodes[b.0] {
            JsonNode::Array(values) => std::mem::take(values),
            _ => return,
        };
        if let JsonNode::Array(values) = &mut self.nodes[a.0] {
            values.extend(b_values);
        }
    }

    /// Canonical JSON serialization of a subtree.
    pub(crate) fn print_node(&self, id: NodeId, out: &mut dyn io::Write) -> io::Result<()> {
        match &self.nodes[id.0] {
            JsonNode::Null | JsonNode::NullSkipError => out.write_all(b"null"),
            JsonNode::Bool(true) => out.write_all(b"true"),
            JsonNode::Bool(false) => out.write_all(b"false"),
            JsonNode::Number(token) => out.write_all(token.as_str().as_bytes()),
            JsonNode::String(s) => write_json_str(out, s.as_str()),
            JsonNode::Array(values) => {
                out.write_all(b"[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        out.write_all(b",")?;
                    }
                    self.print_node(*value, out)?;
                }
                out.write_all(b"]")
            }
            JsonNode::Object(fields) => {
                out.write_all(b"{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.write_all(b",")?;
                    }
                    write_json_str(out, key.as_str())?;
                    out.write_all(b":")?;
                    self.print_node(*value, out)?;
                }
                out.write_all(b"}")
            }
        }
    }

    /// Serializes an object excluding its nested object and array fields.
    /// The flat form is what authorizers receive as field context.
    pub(crate) fn print_object_flat(&self, id: NodeId, out: &mut dyn io::Write) -> io::Result<()> {
        let JsonNode::Object(fields) = &self.nodes[id.0] else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "flat serialization expects an object",
            ));
        };
        out.write_all(b"{")?;
        let mut first = true;
        for (key, value) in fields {
            if !self.nodes[value.0].is_primitive() {
                continue;
            }
            if !first {
                out.write_all(b",")?;
            }
            first = false;
            write_json_str(out, key.as_str())?;
            out.write_all(b":")?;
            self.print_node(*value, out)?;
        }
        out.write_all(b"}")
    }

    /// Renders a node for inclusion in an error message: primitives as their
    /// raw text, containers as serialized JSON.
    pub(crate) fn node_value_text(&self, id: NodeId) -> String {
        match &self.nodes[id.0] {
            JsonNode::String(s) => s.as_str().to_owned(),
            JsonNode::Number(token) => token.as_str().to_owned(),
            JsonNode::Bool(b) => b.to_string(),
            JsonNode::Null | JsonNode::NullSkipError => "null".to_owned(),
            JsonNode::Object(_) | JsonNode::Array(_) => {
                let mut buf = Vec::new();
                match self.print_node(id, &mut buf) {
                    Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
                    Err(_) => String::new(),
                }
            }
        }
    }

    /// Builds a GraphQL error object `{"message": ..., "path": [...]}`. The
    /// path is omitted when empty.
    pub(crate) fn append_error_with_message(&mut self, message: &str, path: &Path) -> NodeId {
        let message_node = self.append_string(message);
        let mut fields = vec![(ByteString::from("message"), message_node)];
        if !path.is_empty() {
            let elements = path
                .iter()
                .map(|element| match element {
                    PathElement::Key(key) => self.append_string(key.as_str()),
                    PathElement::Index(index) => self.append_number_raw(index.to_string()),
                })
                .collect::<Vec<_>>();
            let path_node = self.push(JsonNode::Array(elements));
            fields.push((ByteString::from("path"), path_node));
        }
        self.push(JsonNode::Object(fields))
    }

    pub(crate) fn append_non_nullable_field_is_null_error(
        &mut self,
        field_path: &str,
        path: &Path,
    ) -> NodeId {
        self.append_error_with_message(
            &format!("Cannot return null for non-nullable field {field_path}."),
            path,
        )
    }
}

fn write_json_str(out: &mut dyn io::Write, s: &str) -> io::Result<()> {
    serde_json::to_writer(out, s).map_err(io::Error::other)
}

/// A GraphQL path element that is composed of strings or numbers.
/// e.g `/book/3/name`
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Hash)]
#[serde(untagged)]
pub enum PathElement {
    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

// Hand-written rather than untagged: with serde_json's arbitrary_precision
// feature a number arrives as the crate's internal map token, which an
// untagged enum cannot match.
impl<'de> Deserialize<'de> for PathElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(PathElementVisitor)
    }
}

struct PathElementVisitor;

impl<'de> serde::de::Visitor<'de> for PathElementVisitor {
    type Value = PathElement;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a string key or a numeric index")
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(PathElement::Index(v as usize))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        usize::try_from(v)
            .map(PathElement::Index)
            .map_err(|_| E::invalid_value(serde::de::Unexpected::Signed(v), &self))
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(PathElement::Key(s.to_string()))
    }

    fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let number =
            serde_json::Number::deserialize(serde::de::value::MapAccessDeserializer::new(map))?;
        number
            .as_u64()
            .map(|v| PathElement::Index(v as usize))
            .ok_or_else(|| serde::de::Error::custom("invalid numeric path index"))
    }
}

/// A path into the result document.
///
/// This can be composed of strings and numbers
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Default, Hash)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn from_slice<T: AsRef<str>>(s: &[T]) -> Self {
        Self(
            s.iter()
                .map(|x| x.as_ref())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element)
    }

    pub fn pop(&mut self) -> Option<PathElement> {
        self.0.pop()
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.0.truncate(len)
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<T: IntoIterator<Item = PathElement>>(iter: T) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}
