//! Host-side values reachable from the guest through handles.
//!
//! A guest never sees a `HostValue` directly; it holds the `u32` handle the
//! object table assigned to it. Values are cheap to clone: strings and bytes
//! are owned, objects and functions are shared behind an `Arc`.

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Signature of a host function callable from the guest: `(this, args) -> result`.
pub type HostFunction = Arc<dyn Fn(&HostValue, &[HostValue]) -> HostValue + Send + Sync>;

/// A dynamically shaped host value.
#[derive(Clone, Default)]
pub enum HostValue {
    /// Absence of a value (handle 0).
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number (all numbers are doubles, as in the host environments kwasm targets).
    Number(f64),
    /// UTF-8 text.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Property bag shared by reference.
    Object(HostObject),
    /// Callable host function.
    Function(HostFunction),
}

impl HostValue {
    /// Create a string value.
    pub fn string(v: impl Into<String>) -> Self {
        Self::String(v.into())
    }

    /// Create a function value from a closure.
    pub fn function(
        f: impl Fn(&HostValue, &[HostValue]) -> HostValue + Send + Sync + 'static,
    ) -> Self {
        Self::Function(Arc::new(f))
    }

    /// Short name of this value's kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
        }
    }

    /// Check if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow as text, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as an object, if this is one.
    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Convert to f64 if possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Convert to a guest-sized unsigned integer.
    ///
    /// Numbers are truncated toward zero and saturate at the `u32` range;
    /// NaN maps to 0.
    pub fn as_u32(&self) -> Option<u32> {
        self.as_f64().map(|n| n as u32)
    }

    /// Render the value as text, the way it is handed to the guest.
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
            Self::String(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Self::Object(o) => o.to_json().to_string(),
            Self::Function(_) => "[function]".to_string(),
        }
    }

    /// Read a property.
    ///
    /// Objects look the name up in their property bag; strings and bytes
    /// expose `length`. Everything else has no properties.
    pub fn property(&self, name: &str) -> Option<HostValue> {
        match self {
            Self::Object(o) => o.get(name),
            Self::String(s) if name == "length" => Some(Self::Number(s.chars().count() as f64)),
            Self::Bytes(b) if name == "length" => Some(Self::Number(b.len() as f64)),
            _ => None,
        }
    }

    /// Call this value as a function.
    pub fn call(&self, this: &HostValue, args: &[HostValue]) -> Option<HostValue> {
        match self {
            Self::Function(f) => Some(f(this, args)),
            _ => None,
        }
    }

    /// Build a host value from JSON. Arrays become objects keyed by index.
    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            JsonValue::String(s) => Self::String(s.clone()),
            JsonValue::Array(items) => {
                let object = HostObject::new();
                for (i, item) in items.iter().enumerate() {
                    object.set(i.to_string(), Self::from_json(item));
                }
                object.set("length", Self::Number(items.len() as f64));
                Self::Object(object)
            }
            JsonValue::Object(map) => {
                let object = HostObject::new();
                for (k, v) in map {
                    object.set(k.clone(), Self::from_json(v));
                }
                Self::Object(object)
            }
        }
    }

    /// Convert to JSON. Functions and bytes have no JSON form and become null
    /// and an array of numbers respectively. An object reached again while it
    /// is still being rendered becomes the string `"[circular]"`.
    pub fn to_json(&self) -> JsonValue {
        self.to_json_within(&mut Vec::new())
    }

    fn to_json_within(&self, ancestors: &mut Vec<*const ()>) -> JsonValue {
        match self {
            Self::Null | Self::Function(_) => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Number(n) => {
                serde_json::Number::from_f64(*n).map_or(JsonValue::Null, JsonValue::Number)
            }
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Bytes(b) => JsonValue::Array(b.iter().map(|x| JsonValue::from(*x)).collect()),
            Self::Object(o) => o.to_json_within(ancestors),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Self::String(s) => f.debug_tuple("String").field(s).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Object(o) => o.fmt(f),
            Self::Function(_) => f.write_str("Function"),
        }
    }
}

impl PartialEq for HostValue {
    /// Scalars compare by value; objects and functions by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<u32> for HostValue {
    fn from(v: u32) -> Self {
        Self::Number(v as f64)
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<HostObject> for HostValue {
    fn from(v: HostObject) -> Self {
        Self::Object(v)
    }
}

impl From<JsonValue> for HostValue {
    fn from(v: JsonValue) -> Self {
        Self::from_json(&v)
    }
}

const CIRCULAR: &str = "[circular]";

/// A shared, mutable property bag.
///
/// Cloning a `HostObject` yields another reference to the same bag, so the
/// global object handed to every context observes the same properties.
#[derive(Clone, Default)]
pub struct HostObject(Arc<RwLock<BTreeMap<String, HostValue>>>);

impl HostObject {
    /// Create an empty object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style property insertion.
    pub fn with(self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Read a property.
    pub fn get(&self, name: &str) -> Option<HostValue> {
        self.0.read().get(name).cloned()
    }

    /// Set a property, returning the previous value.
    pub fn set(&self, name: impl Into<String>, value: impl Into<HostValue>) -> Option<HostValue> {
        self.0.write().insert(name.into(), value.into())
    }

    /// Remove a property.
    pub fn remove(&self, name: &str) -> Option<HostValue> {
        self.0.write().remove(name)
    }

    /// Property names in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.0.read().keys().cloned().collect()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Check if there are no properties.
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Snapshot the object as JSON.
    ///
    /// Objects may reference themselves (directly or through children); such
    /// back references render as `"[circular]"`.
    pub fn to_json(&self) -> JsonValue {
        self.to_json_within(&mut Vec::new())
    }

    fn to_json_within(&self, ancestors: &mut Vec<*const ()>) -> JsonValue {
        let id = Arc::as_ptr(&self.0).cast::<()>();
        if ancestors.contains(&id) {
            return JsonValue::String(CIRCULAR.to_string());
        }
        // Snapshot first so no lock is held while children are rendered.
        let entries: Vec<(String, HostValue)> =
            self.0.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        ancestors.push(id);
        let json = entries
            .into_iter()
            .map(|(k, v)| {
                let rendered = v.to_json_within(ancestors);
                (k, rendered)
            })
            .collect();
        ancestors.pop();
        JsonValue::Object(json)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_access() {
        let console = HostObject::new().with("level", 3u32);
        let global = HostValue::Object(HostObject::new().with("console", console.clone()));

        let found = global.property("console").expect("console missing");
        assert_eq!(found, HostValue::Object(console));
        assert!(global.property("window").is_none());

        assert_eq!(
            HostValue::string("héllo").property("length"),
            Some(HostValue::Number(5.0))
        );
        assert!(HostValue::Number(1.0).property("length").is_none());
    }

    #[test]
    fn numeric_conversions() {
        assert_eq!(HostValue::Number(42.9).as_u32(), Some(42));
        assert_eq!(HostValue::Number(-3.0).as_u32(), Some(0));
        assert_eq!(HostValue::Bool(true).as_u32(), Some(1));
        assert_eq!(HostValue::string(" 17 ").as_u32(), Some(17));
        assert_eq!(HostValue::Null.as_u32(), None);
    }

    #[test]
    fn text_rendering() {
        assert_eq!(HostValue::Number(8.0).to_text(), "8");
        assert_eq!(HostValue::Number(0.5).to_text(), "0.5");
        assert_eq!(HostValue::Bool(false).to_text(), "false");
        assert_eq!(HostValue::string("abc").to_text(), "abc");
    }

    #[test]
    fn json_conversion() {
        let value = HostValue::from_json(&json!({
            "hardwareConcurrency": 8,
            "name": "main",
            "tags": ["a", "b"]
        }));

        assert_eq!(
            value.property("hardwareConcurrency"),
            Some(HostValue::Number(8.0))
        );
        let tags = value.property("tags").expect("tags missing");
        assert_eq!(tags.property("1"), Some(HostValue::string("b")));
        assert_eq!(tags.property("length"), Some(HostValue::Number(2.0)));

        assert_eq!(value.to_json()["name"], json!("main"));
    }

    #[test]
    fn functions_compare_by_identity() {
        let f = HostValue::function(|_, args| HostValue::Number(args.len() as f64));
        let g = f.clone();
        assert_eq!(f, g);
        assert_ne!(f, HostValue::function(|_, _| HostValue::Null));

        let result = f.call(&HostValue::Null, &[HostValue::Null, HostValue::Null]);
        assert_eq!(result, Some(HostValue::Number(2.0)));
        assert!(HostValue::Null.call(&HostValue::Null, &[]).is_none());
    }

    #[test]
    fn self_referencing_objects_render() {
        let global = HostObject::new().with("name", "main");
        global.set("self", global.clone());
        let child = HostObject::new().with("parent", global.clone());
        global.set("child", child.clone());

        let json = global.to_json();
        assert_eq!(json["self"], json!("[circular]"));
        assert_eq!(json["child"]["parent"], json!("[circular]"));
        assert_eq!(json["name"], json!("main"));
        assert!(HostValue::Object(global).to_text().contains(r#""self":"[circular]""#));
    }

    #[test]
    fn shared_siblings_are_not_circular() {
        let shared = HostObject::new().with("v", 1u32);
        let root = HostObject::new()
            .with("a", shared.clone())
            .with("b", shared);

        let json = root.to_json();
        assert_eq!(json["a"], json!({"v": 1.0}));
        assert_eq!(json["b"], json!({"v": 1.0}));
    }
}
