//! Path specifications: immutable addresses of one storage layer.
//!
//! A `PathSpec` carries a type indicator, a map of scalar format parameters
//! and an optional shared parent. Chains are built bottom-up (outermost
//! physical source first) and never mutated afterwards; "changing" a
//! parameter means building a new `PathSpec`.
//!
//! Equality is structural and walks the parent chain iteratively, so two
//! independently built chains compare equal iff every layer matches. Each
//! layer stores a hash of its whole chain, computed once from the parent's
//! hash when the layer is built. This is what makes a `PathSpec` usable as a
//! cache key at any depth.
//!
//! The JSON form nests each parent under a `"parent"` key. Both directions
//! walk the chain in a loop, so chains deeper than the JSON parser's nesting
//! limit still round-trip.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::type_indicator::{
    DATA_STREAM, IDENTIFIER, LEAF_PARAMETERS, LOCATION, PART_INDEX, RESERVED,
};

/// Errors from building or parsing a path specification.
#[derive(Debug, thiserror::Error)]
pub enum PathSpecError {
    #[error("missing type indicator")]
    MissingTypeIndicator,
    #[error("reserved parameter name '{0}'")]
    ReservedParameter(String),
    #[error("invalid serialized path specification: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A scalar format parameter value.
///
/// Serialized untagged, so `{"location": "/p1", "part_index": 0}` reads
/// back as `Text` and `Integer` respectively.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(u64),
    Text(String),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ParamValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Integer(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

/// Immutable description of one storage layer plus its ancestry.
#[derive(Clone)]
pub struct PathSpec {
    type_indicator: String,
    parameters: BTreeMap<String, ParamValue>,
    parent: Option<Arc<PathSpec>>,
    chain_hash: u64,
}

/// Hash of one layer folded over its parent's chain hash.
fn chain_hash(
    type_indicator: &str,
    parameters: &BTreeMap<String, ParamValue>,
    parent: Option<&Arc<PathSpec>>,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    parent.map(|p| p.chain_hash).hash(&mut hasher);
    type_indicator.hash(&mut hasher);
    parameters.hash(&mut hasher);
    hasher.finish()
}

impl PathSpec {
    fn from_parts(
        type_indicator: String,
        parameters: BTreeMap<String, ParamValue>,
        parent: Option<Arc<PathSpec>>,
    ) -> Self {
        let chain_hash = chain_hash(&type_indicator, &parameters, parent.as_ref());
        Self {
            type_indicator,
            parameters,
            parent,
            chain_hash,
        }
    }

    fn with_parameters(&self, parameters: BTreeMap<String, ParamValue>) -> PathSpec {
        PathSpec::from_parts(self.type_indicator.clone(), parameters, self.parent.clone())
    }

    /// Start building a path specification of the given type.
    pub fn builder(type_indicator: impl Into<String>) -> PathSpecBuilder {
        PathSpecBuilder {
            type_indicator: type_indicator.into(),
            parameters: BTreeMap::new(),
            parent: None,
        }
    }

    /// Convenience constructor for a host OS file, the usual chain root.
    pub fn os(location: impl Into<String>) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(LOCATION.to_string(), ParamValue::Text(location.into()));
        Self::from_parts(crate::type_indicator::OS.to_string(), parameters, None)
    }

    pub fn type_indicator(&self) -> &str {
        &self.type_indicator
    }

    pub fn parent(&self) -> Option<&PathSpec> {
        self.parent.as_deref()
    }

    /// The shared parent, for building siblings without copying the chain.
    pub fn parent_arc(&self) -> Option<&Arc<PathSpec>> {
        self.parent.as_ref()
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// True for the physical source at the bottom of a chain.
    pub fn is_system_level(&self) -> bool {
        self.parent.is_none()
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.parameters
    }

    pub fn location(&self) -> Option<&str> {
        self.parameter(LOCATION).and_then(ParamValue::as_str)
    }

    pub fn identifier(&self) -> Option<u64> {
        self.parameter(IDENTIFIER).and_then(ParamValue::as_u64)
    }

    pub fn data_stream(&self) -> Option<&str> {
        self.parameter(DATA_STREAM).and_then(ParamValue::as_str)
    }

    pub fn part_index(&self) -> Option<u64> {
        self.parameter(PART_INDEX).and_then(ParamValue::as_u64)
    }

    /// Number of layers in the chain, including this one.
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// Iterate from this layer towards the physical source.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    /// Key of the container this layer lives in.
    ///
    /// Same type and parent, minus the parameters that only pick something
    /// inside the container (location, identifier, data stream, partition
    /// index). Two specs addressing different files in the same archive
    /// share a container key.
    pub fn container_key(&self) -> PathSpec {
        let parameters = self
            .parameters
            .iter()
            .filter(|(name, _)| !LEAF_PARAMETERS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        self.with_parameters(parameters)
    }

    /// A new spec with `name` set to `value`; the parent chain is shared.
    ///
    /// Fails for the names the serialized form reserves for itself.
    pub fn with_parameter(
        &self,
        name: &str,
        value: impl Into<ParamValue>,
    ) -> Result<PathSpec, PathSpecError> {
        if RESERVED.contains(&name) {
            return Err(PathSpecError::ReservedParameter(name.to_string()));
        }
        let mut parameters = self.parameters.clone();
        parameters.insert(name.to_string(), value.into());
        Ok(self.with_parameters(parameters))
    }

    fn with_known(&self, name: &str, value: ParamValue) -> PathSpec {
        let mut parameters = self.parameters.clone();
        parameters.insert(name.to_string(), value);
        self.with_parameters(parameters)
    }

    pub fn with_location(&self, location: impl Into<String>) -> PathSpec {
        self.with_known(LOCATION, ParamValue::Text(location.into()))
    }

    pub fn with_identifier(&self, identifier: u64) -> PathSpec {
        self.with_known(IDENTIFIER, ParamValue::Integer(identifier))
    }

    pub fn with_data_stream(&self, name: impl Into<String>) -> PathSpec {
        self.with_known(DATA_STREAM, ParamValue::Text(name.into()))
    }

    pub fn with_part_index(&self, index: u64) -> PathSpec {
        self.with_known(PART_INDEX, ParamValue::Integer(index))
    }

    /// A new spec without `name`; the parent chain is shared.
    pub fn without_parameter(&self, name: &str) -> PathSpec {
        let mut parameters = self.parameters.clone();
        parameters.remove(name);
        self.with_parameters(parameters)
    }

    /// Builder pre-populated with this layer, for deriving related specs.
    pub fn to_builder(&self) -> PathSpecBuilder {
        PathSpecBuilder {
            type_indicator: self.type_indicator.clone(),
            parameters: self.parameters.clone(),
            parent: self.parent.clone(),
        }
    }

    /// Multi-line diagnostic form, outermost layer first.
    ///
    /// ```text
    /// type: os, location: /images/disk.raw
    /// type: mbr, location: /p2
    /// ```
    pub fn comparable(&self) -> String {
        let mut layers: Vec<&PathSpec> = self.ancestors().collect();
        layers.reverse();

        let mut out = String::new();
        for layer in layers {
            out.push_str("type: ");
            out.push_str(&layer.type_indicator);
            for (name, value) in &layer.parameters {
                out.push_str(&format!(", {name}: {value}"));
            }
            out.push('\n');
        }
        out
    }

    pub fn to_json(&self) -> Result<String, PathSpecError> {
        self.write_json(false)
    }

    pub fn to_json_pretty(&self) -> Result<String, PathSpecError> {
        self.write_json(true)
    }

    /// Parse the JSON form produced by [`PathSpec::to_json`].
    pub fn from_json(json: &str) -> Result<PathSpec, PathSpecError> {
        let mut layers = Vec::new();
        let mut text = json;
        loop {
            let layer: Layer<'_> = serde_json::from_str(text)?;
            if layer.type_indicator.is_empty() {
                return Err(PathSpecError::MissingTypeIndicator);
            }
            layers.push((layer.type_indicator, layer.parameters));
            match layer.parent {
                Some(parent) => text = parent.get(),
                None => break,
            }
        }

        // Rebuild from the physical source up.
        let mut spec = None;
        for (type_indicator, parameters) in layers.into_iter().rev() {
            spec = Some(PathSpec::from_parts(type_indicator, parameters, spec.map(Arc::new)));
        }
        spec.ok_or(PathSpecError::MissingTypeIndicator)
    }

    // Opens one object per layer, leaf first, then closes them all.
    fn write_json(&self, pretty: bool) -> Result<String, PathSpecError> {
        let mut out = String::new();
        let mut depth = 0;
        for layer in self.ancestors() {
            out.push('{');
            let type_indicator = ParamValue::Text(layer.type_indicator.clone());
            let fields = std::iter::once(("type_indicator", &type_indicator))
                .chain(layer.parameters.iter().map(|(name, value)| (name.as_str(), value)));
            for (i, (name, value)) in fields.enumerate() {
                if i > 0 {
                    out.push(',');
                }
                newline(&mut out, pretty, depth + 1);
                out.push_str(&serde_json::to_string(name)?);
                out.push_str(if pretty { ": " } else { ":" });
                out.push_str(&serde_json::to_string(value)?);
            }
            if layer.parent.is_some() {
                out.push(',');
                newline(&mut out, pretty, depth + 1);
                out.push_str(if pretty { "\"parent\": " } else { "\"parent\":" });
            }
            depth += 1;
        }
        for level in (0..depth).rev() {
            newline(&mut out, pretty, level);
            out.push('}');
        }
        Ok(out)
    }
}

fn newline(out: &mut String, pretty: bool, level: usize) {
    if pretty {
        let _ = write!(out, "\n{:width$}", "", width = level * 2);
    }
}

/// One layer of the JSON form, with its parent left unparsed.
struct Layer<'a> {
    type_indicator: String,
    parameters: BTreeMap<String, ParamValue>,
    parent: Option<&'a RawValue>,
}

impl<'de> Deserialize<'de> for Layer<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(LayerVisitor)
    }
}

struct LayerVisitor;

impl<'de> Visitor<'de> for LayerVisitor {
    type Value = Layer<'de>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a path specification object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut type_indicator: Option<String> = None;
        let mut parent: Option<Option<&'de RawValue>> = None;
        let mut parameters = BTreeMap::new();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "type_indicator" => {
                    if type_indicator.is_some() {
                        return Err(de::Error::duplicate_field("type_indicator"));
                    }
                    type_indicator = Some(map.next_value()?);
                }
                // Kept as raw text; the caller parses it on the next turn
                // of its loop instead of recursing here.
                "parent" => {
                    if parent.is_some() {
                        return Err(de::Error::duplicate_field("parent"));
                    }
                    parent = Some(map.next_value()?);
                }
                _ => {
                    let value: ParamValue = map.next_value()?;
                    if parameters.insert(key.clone(), value).is_some() {
                        return Err(de::Error::custom(format!("duplicate parameter `{key}`")));
                    }
                }
            }
        }

        Ok(Layer {
            type_indicator: type_indicator
                .ok_or_else(|| de::Error::missing_field("type_indicator"))?,
            parameters,
            parent: parent.flatten(),
        })
    }
}

impl Serialize for PathSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let json = self.to_json().map_err(ser::Error::custom)?;
        let raw = RawValue::from_string(json).map_err(ser::Error::custom)?;
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PathSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        PathSpec::from_json(raw.get()).map_err(de::Error::custom)
    }
}

impl PartialEq for PathSpec {
    fn eq(&self, other: &Self) -> bool {
        if self.chain_hash != other.chain_hash {
            return false;
        }
        let mut left = self.ancestors();
        let mut right = other.ancestors();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return true,
                (Some(a), Some(b)) => {
                    // Shared tail: everything below is identical.
                    if std::ptr::eq(a, b) {
                        return true;
                    }
                    if a.type_indicator != b.type_indicator || a.parameters != b.parameters {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

impl Eq for PathSpec {}

impl Hash for PathSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.chain_hash);
    }
}

impl Drop for PathSpec {
    // Unlink uniquely owned ancestors one at a time so that dropping a very
    // deep chain does not recurse.
    fn drop(&mut self) {
        let mut next = self.parent.take();
        while let Some(parent) = next {
            match Arc::try_unwrap(parent) {
                Ok(mut spec) => next = spec.parent.take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut layers: Vec<&PathSpec> = self.ancestors().collect();
        layers.reverse();
        for (i, layer) in layers.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{}", layer.type_indicator)?;
            if !layer.parameters.is_empty() {
                let params: Vec<String> = layer
                    .parameters
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect();
                write!(f, "[{}]", params.join(","))?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathSpec({self})")
    }
}

/// Iterator over a chain, from the starting layer to the physical source.
pub struct Ancestors<'a> {
    next: Option<&'a PathSpec>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a PathSpec;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

/// Validating constructor for [`PathSpec`].
#[derive(Clone, Debug)]
pub struct PathSpecBuilder {
    type_indicator: String,
    parameters: BTreeMap<String, ParamValue>,
    parent: Option<Arc<PathSpec>>,
}

impl PathSpecBuilder {
    pub fn parent(mut self, parent: PathSpec) -> Self {
        self.parent = Some(Arc::new(parent));
        self
    }

    pub fn parent_arc(mut self, parent: Arc<PathSpec>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn location(self, location: impl Into<String>) -> Self {
        self.parameter(LOCATION, location.into())
    }

    pub fn identifier(self, identifier: u64) -> Self {
        self.parameter(IDENTIFIER, identifier)
    }

    pub fn data_stream(self, name: impl Into<String>) -> Self {
        self.parameter(DATA_STREAM, name.into())
    }

    pub fn part_index(self, index: u64) -> Self {
        self.parameter(PART_INDEX, index)
    }

    pub fn build(self) -> Result<PathSpec, PathSpecError> {
        if self.type_indicator.is_empty() {
            return Err(PathSpecError::MissingTypeIndicator);
        }
        if let Some(name) = self
            .parameters
            .keys()
            .find(|name| RESERVED.contains(&name.as_str()))
        {
            return Err(PathSpecError::ReservedParameter(name.clone()));
        }
        Ok(PathSpec::from_parts(
            self.type_indicator,
            self.parameters,
            self.parent,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_indicator::{CPIO, MBR, OS};
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn hash_of(spec: &PathSpec) -> u64 {
        let mut hasher = DefaultHasher::new();
        spec.hash(&mut hasher);
        hasher.finish()
    }

    fn cpio_chain(location: &str) -> PathSpec {
        PathSpec::builder(CPIO)
            .location(location)
            .parent(PathSpec::os("/tmp/syslog.bin.cpio"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_accessors() {
        let spec = PathSpec::builder(MBR)
            .location("/p2")
            .part_index(1)
            .parent(PathSpec::os("/tmp/disk.raw"))
            .build()
            .unwrap();

        assert_eq!(spec.type_indicator(), MBR);
        assert_eq!(spec.location(), Some("/p2"));
        assert_eq!(spec.part_index(), Some(1));
        assert_eq!(spec.identifier(), None);
        assert!(spec.has_parent());
        assert_eq!(spec.parent().unwrap().type_indicator(), OS);
        assert!(spec.parent().unwrap().is_system_level());
        assert_eq!(spec.depth(), 2);
    }

    #[test]
    fn test_builder_rejects_reserved_and_empty() {
        let err = PathSpec::builder(OS).parameter("parent", "x").build();
        assert!(matches!(err, Err(PathSpecError::ReservedParameter(name)) if name == "parent"));

        let err = PathSpec::builder("").build();
        assert!(matches!(err, Err(PathSpecError::MissingTypeIndicator)));
    }

    #[test]
    fn test_structural_equality() {
        let a = cpio_chain("/syslog");
        let b = cpio_chain("/syslog");
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        assert_ne!(a, cpio_chain("/other"));

        // Same leaf, different ancestor.
        let c = PathSpec::builder(CPIO)
            .location("/syslog")
            .parent(PathSpec::os("/tmp/elsewhere.cpio"))
            .build()
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_different_depth_never_equal() {
        let shallow = PathSpec::builder(CPIO).location("/syslog").build().unwrap();
        let deep = cpio_chain("/syslog");
        assert_ne!(shallow, deep);
        assert_ne!(deep, shallow);
    }

    #[test]
    fn test_usable_as_hash_key() {
        let mut set = HashSet::new();
        set.insert(cpio_chain("/syslog"));
        set.insert(cpio_chain("/syslog"));
        set.insert(cpio_chain("/other"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_json_roundtrip() {
        let spec = PathSpec::builder(MBR)
            .location("/p1")
            .part_index(0)
            .parameter("read_only", true)
            .parent(PathSpec::os("/tmp/disk.raw"))
            .build()
            .unwrap();

        let json = spec.to_json().unwrap();
        let parsed = PathSpec::from_json(&json).unwrap();
        assert_eq!(spec, parsed);
        assert_eq!(parsed.parameter("read_only"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn test_json_layout() {
        let json = cpio_chain("/syslog").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type_indicator"], "cpio");
        assert_eq!(value["location"], "/syslog");
        assert_eq!(value["parent"]["type_indicator"], "os");
        assert!(value["parent"].get("parent").is_none());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(PathSpec::from_json("{\"location\": \"/x\"}").is_err());
        assert!(PathSpec::from_json("{\"type_indicator\": \"\"}").is_err());
    }

    #[test]
    fn test_container_key_strips_leaf_parameters() {
        let a = cpio_chain("/syslog");
        let b = cpio_chain("/other");
        assert_eq!(a.container_key(), b.container_key());
        assert_eq!(a.container_key().location(), None);
        // Ancestors keep their own parameters.
        assert_eq!(
            a.container_key().parent().unwrap().location(),
            Some("/tmp/syslog.bin.cpio")
        );
    }

    #[test]
    fn test_with_and_without_parameter() {
        let spec = cpio_chain("/syslog");
        let streamed = spec.with_data_stream("rsrc");
        assert_eq!(streamed.data_stream(), Some("rsrc"));
        assert_eq!(spec.data_stream(), None);
        assert_eq!(streamed.without_parameter("data_stream"), spec);
        assert_eq!(hash_of(&streamed.without_parameter("data_stream")), hash_of(&spec));

        let tagged = spec.with_parameter("read_only", true).unwrap();
        assert_eq!(tagged.parameter("read_only"), Some(&ParamValue::Bool(true)));
        assert_eq!(spec.with_location("/other"), cpio_chain("/other"));
    }

    #[test]
    fn test_with_parameter_rejects_reserved() {
        let spec = cpio_chain("/syslog");
        for name in ["parent", "type_indicator"] {
            let err = spec.with_parameter(name, "x").unwrap_err();
            assert!(matches!(err, PathSpecError::ReservedParameter(n) if n == name));
        }
        // Nothing derived from the spec can produce unparseable JSON.
        let json = spec.with_parameter("note", "parent").unwrap().to_json().unwrap();
        assert!(PathSpec::from_json(&json).is_ok());
    }

    #[test]
    fn test_json_duplicate_keys_rejected() {
        let json = r#"{"type_indicator":"cpio","parent":"x","parent":{"type_indicator":"os"}}"#;
        assert!(PathSpec::from_json(json).is_err());
        let json = r#"{"type_indicator":"os","location":"/a","location":"/b"}"#;
        assert!(PathSpec::from_json(json).is_err());
    }

    #[test]
    fn test_json_null_parent_is_root() {
        let spec = PathSpec::from_json(r#"{"type_indicator":"os","location":"/a","parent":null}"#)
            .unwrap();
        assert_eq!(spec, PathSpec::os("/a"));
    }

    #[test]
    fn test_json_pretty_roundtrip() {
        let spec = cpio_chain("/syslog");
        let pretty = spec.to_json_pretty().unwrap();
        assert!(pretty.contains("\n  \"parent\": {\n    \"type_indicator\": \"os\""));
        assert_eq!(PathSpec::from_json(&pretty).unwrap(), spec);

        let value: serde_json::Value = serde_json::from_str(&pretty).unwrap();
        let compact: serde_json::Value = serde_json::from_str(&spec.to_json().unwrap()).unwrap();
        assert_eq!(value, compact);
    }

    #[test]
    fn test_json_roundtrip_deep_chain() {
        let mut spec = PathSpec::os("/images/disk.raw");
        for i in 0..1500u64 {
            spec = PathSpec::builder("data_range")
                .parameter("range_offset", i)
                .parameter("range_size", 4096u64)
                .parent(spec)
                .build()
                .unwrap();
        }

        let json = spec.to_json().unwrap();
        let parsed = PathSpec::from_json(&json).unwrap();
        assert_eq!(parsed.depth(), 1501);
        assert_eq!(parsed, spec);
        assert_eq!(hash_of(&parsed), hash_of(&spec));

        let pretty = spec.to_json_pretty().unwrap();
        assert_eq!(PathSpec::from_json(&pretty).unwrap(), spec);
    }

    #[test]
    fn test_serde_impls_embed_json_form() {
        #[derive(Serialize, Deserialize)]
        struct Saved {
            name: String,
            spec: PathSpec,
        }

        let mut spec = cpio_chain("/syslog");
        for i in 0..300u64 {
            spec = PathSpec::builder("data_range")
                .parameter("range_offset", i)
                .parent(spec)
                .build()
                .unwrap();
        }
        let saved = Saved {
            name: "evidence".to_string(),
            spec: spec.clone(),
        };
        let json = serde_json::to_string(&saved).unwrap();
        let loaded: Saved = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.name, "evidence");
        assert_eq!(loaded.spec, spec);
    }

    #[test]
    fn test_comparable_and_display() {
        let spec = cpio_chain("/syslog");
        assert_eq!(
            spec.comparable(),
            "type: os, location: /tmp/syslog.bin.cpio\ntype: cpio, location: /syslog\n"
        );
        assert_eq!(
            spec.to_string(),
            "os[location=/tmp/syslog.bin.cpio] -> cpio[location=/syslog]"
        );
    }

    #[test]
    fn test_deep_chain_compare_and_drop() {
        fn chain(depth: usize) -> PathSpec {
            let mut spec = PathSpec::os("/deep");
            for i in 0..depth {
                spec = PathSpec::builder("data_range")
                    .parameter("range_offset", i as u64)
                    .parent(spec)
                    .build()
                    .unwrap();
            }
            spec
        }

        let a = chain(100_000);
        let b = chain(100_000);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(hash_of(&a), hash_of(a.parent().unwrap()));
        assert_eq!(a.depth(), 100_001);
        drop(a);
        drop(b);
    }
}
