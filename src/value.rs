// JValue: Rc-wrapped value type for O(1) cloning
// Carries the undefined sentinel and sequence flags used during evaluation.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize, Deserializer};

use crate::ast::Node;
use crate::environment::Environment;
use crate::error::Error;
use crate::evaluator::Evaluator;

/// Flags carried by array values during evaluation.
///
/// A *sequence* is the internal carrier for multi-value path results; it is
/// spliced into the surrounding tuple stream at step boundaries. A *cons*
/// array came from an array constructor and is never spliced. *Keep* marks
/// arrays produced under the `expr[]` form, which must not collapse to a
/// singleton. None of these survive into host-visible output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArrayFlags(u8);

impl ArrayFlags {
    pub const NONE: ArrayFlags = ArrayFlags(0);
    pub const SEQUENCE: ArrayFlags = ArrayFlags(1);
    pub const CONS: ArrayFlags = ArrayFlags(2);
    pub const KEEP: ArrayFlags = ArrayFlags(4);

    #[inline]
    pub fn contains(self, other: ArrayFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn with(self, other: ArrayFlags) -> ArrayFlags {
        ArrayFlags(self.0 | other.0)
    }
}

/// A lambda value: the function body plus the environment and input captured
/// at its definition site.
#[derive(Clone)]
pub struct LambdaClosure {
    pub params: Vec<String>,
    pub body: Rc<Node>,
    pub env: Rc<Environment>,
    pub input: JValue,
}

impl fmt::Debug for LambdaClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaClosure")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Implementation signature for native functions: evaluated arguments, the
/// current input, and the active environment, with the evaluator handed back
/// in so higher-order functions can re-enter evaluation.
pub type NativeImpl =
    Rc<dyn Fn(&mut Evaluator, &[JValue], &JValue, &Rc<Environment>) -> Result<JValue, Error>>;

/// A named native function registered on an environment.
#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    pub implementation: NativeImpl,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        implementation: impl Fn(&mut Evaluator, &[JValue], &JValue, &Rc<Environment>) -> Result<JValue, Error>
            + 'static,
    ) -> Self {
        NativeFunction {
            name: name.into(),
            implementation: Rc::new(implementation),
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// One argument slot of a partial application.
#[derive(Clone, Debug)]
pub enum PartialArg {
    Fixed(JValue),
    Placeholder,
}

/// A partially applied function: the callee plus a mix of frozen arguments
/// and placeholder positions filled at invocation time.
#[derive(Clone, Debug)]
pub struct PartialApplication {
    pub callee: JValue,
    pub args: Vec<PartialArg>,
}

/// A JSON-like value with O(1) clone semantics via Rc-wrapping.
///
/// Standard JSON types (Array, Object, String) are wrapped in Rc for cheap
/// cloning. The evaluation-internal types (Undefined, the callables, Regex)
/// are first-class variants.
#[derive(Clone, Debug)]
pub enum JValue {
    // Standard JSON types
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<Vec<JValue>>, ArrayFlags),
    Object(Rc<IndexMap<String, JValue>>),

    // Evaluation-internal types
    Undefined,
    Lambda(Rc<LambdaClosure>),
    NativeFn(Rc<NativeFunction>),
    Partial(Rc<PartialApplication>),
    Regex { pattern: Rc<str>, flags: Rc<str> },
}

/// A whole-valued finite number within f64 integer precision (2^53), as an
/// i64. This single rule governs rendering, serialization, and `as_i64`.
fn as_integral(n: f64) -> Option<i64> {
    const INT_LIMIT: f64 = 9_007_199_254_740_992.0;
    if n.is_finite() && n == n.trunc() && n.abs() <= INT_LIMIT {
        Some(n as i64)
    } else {
        None
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

impl JValue {
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        if let JValue::Bool(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        if let JValue::Number(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    /// The value as an integer, when it is a number with no fractional part
    /// inside f64 integer precision.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().and_then(as_integral)
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        if let JValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    #[inline]
    pub fn as_array(&self) -> Option<&Vec<JValue>> {
        if let JValue::Array(items, _) = self {
            Some(items)
        } else {
            None
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&IndexMap<String, JValue>> {
        if let JValue::Object(map) = self {
            Some(map)
        } else {
            None
        }
    }

    /// Index into an object by key; `None` off objects and for absent keys.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&JValue> {
        self.as_object()?.get(key)
    }

    /// Index into an array by position.
    #[inline]
    pub fn get_index(&self, index: usize) -> Option<&JValue> {
        self.as_array()?.get(index)
    }
}

// ── Type checks ──────────────────────────────────────────────────────────────

impl JValue {
    /// The JSON null value. Presence with a null value is not the same as
    /// absence; see [`JValue::is_undefined`].
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, JValue::Null)
    }

    /// The absence sentinel. Never part of host-visible output.
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, JValue::Undefined)
    }

    #[inline]
    pub fn is_bool(&self) -> bool {
        self.as_bool().is_some()
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        self.as_f64().is_some()
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        self.as_str().is_some()
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.as_array().is_some()
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        self.as_object().is_some()
    }

    /// Any of the three callable shapes: lambda closure, native function,
    /// or partial application.
    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(
            self,
            JValue::Lambda(_) | JValue::NativeFn(_) | JValue::Partial(_)
        )
    }

    #[inline]
    pub fn is_regex(&self) -> bool {
        matches!(self, JValue::Regex { .. })
    }

    /// Whether this is an array carrying the sequence flag.
    #[inline]
    pub fn is_sequence(&self) -> bool {
        self.array_flags().contains(ArrayFlags::SEQUENCE)
    }

    #[inline]
    pub fn array_flags(&self) -> ArrayFlags {
        match self {
            JValue::Array(_, flags) => *flags,
            _ => ArrayFlags::NONE,
        }
    }
}

// ── Constructors ─────────────────────────────────────────────────────────────

impl JValue {
    #[inline]
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        JValue::String(s.into())
    }

    #[inline]
    pub fn array(v: Vec<JValue>) -> Self {
        JValue::Array(Rc::new(v), ArrayFlags::NONE)
    }

    #[inline]
    pub fn array_with_flags(v: Vec<JValue>, flags: ArrayFlags) -> Self {
        JValue::Array(Rc::new(v), flags)
    }

    /// An internal sequence: the carrier for multi-value path results.
    #[inline]
    pub fn sequence(v: Vec<JValue>) -> Self {
        JValue::Array(Rc::new(v), ArrayFlags::SEQUENCE)
    }

    #[inline]
    pub fn object(m: IndexMap<String, JValue>) -> Self {
        JValue::Object(Rc::new(m))
    }

    #[inline]
    pub fn regex(pattern: impl Into<Rc<str>>, flags: impl Into<Rc<str>>) -> Self {
        JValue::Regex {
            pattern: pattern.into(),
            flags: flags.into(),
        }
    }

    /// Re-tag an array value with additional flags; other values pass through.
    pub fn with_flags(self, flags: ArrayFlags) -> Self {
        match self {
            JValue::Array(arr, f) => JValue::Array(arr, f.with(flags)),
            other => other,
        }
    }
}

// ── From impls ───────────────────────────────────────────────────────────────

impl From<bool> for JValue {
    #[inline]
    fn from(b: bool) -> Self {
        JValue::Bool(b)
    }
}

impl From<i64> for JValue {
    #[inline]
    fn from(n: i64) -> Self {
        JValue::Number(n as f64)
    }
}

impl From<i32> for JValue {
    #[inline]
    fn from(n: i32) -> Self {
        JValue::Number(n as f64)
    }
}

impl From<usize> for JValue {
    #[inline]
    fn from(n: usize) -> Self {
        JValue::Number(n as f64)
    }
}

impl From<f64> for JValue {
    #[inline]
    fn from(n: f64) -> Self {
        JValue::Number(n)
    }
}

impl From<&str> for JValue {
    #[inline]
    fn from(s: &str) -> Self {
        JValue::String(s.into())
    }
}

impl From<String> for JValue {
    #[inline]
    fn from(s: String) -> Self {
        JValue::String(s.into())
    }
}

impl From<Vec<JValue>> for JValue {
    #[inline]
    fn from(v: Vec<JValue>) -> Self {
        JValue::array(v)
    }
}

impl From<IndexMap<String, JValue>> for JValue {
    #[inline]
    fn from(m: IndexMap<String, JValue>) -> Self {
        JValue::object(m)
    }
}

// ── PartialEq ────────────────────────────────────────────────────────────────

impl PartialEq for JValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JValue::Null, JValue::Null) => true,
            (JValue::Undefined, JValue::Undefined) => true,
            (JValue::Bool(a), JValue::Bool(b)) => a == b,
            (JValue::Number(a), JValue::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    return false;
                }
                a == b
            }
            (JValue::String(a), JValue::String(b)) => a == b,
            // Array flags are an evaluation detail, not part of value identity
            (JValue::Array(a, _), JValue::Array(b, _)) => a == b,
            (JValue::Object(a), JValue::Object(b)) => a == b,
            (JValue::Lambda(a), JValue::Lambda(b)) => Rc::ptr_eq(a, b),
            (JValue::NativeFn(a), JValue::NativeFn(b)) => a.name == b.name,
            (JValue::Partial(a), JValue::Partial(b)) => Rc::ptr_eq(a, b),
            (
                JValue::Regex {
                    pattern: ap,
                    flags: af,
                },
                JValue::Regex {
                    pattern: bp,
                    flags: bf,
                },
            ) => ap == bp && af == bf,
            _ => false,
        }
    }
}

// ── Display ──────────────────────────────────────────────────────────────────

/// Quote and escape one string the way JSON requires, reusing the serde
/// encoder rather than a hand-rolled escape table.
fn write_json_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    match serde_json::to_string(s) {
        Ok(quoted) => f.write_str(&quoted),
        Err(_) => Err(fmt::Error),
    }
}

impl fmt::Display for JValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JValue::Null => f.write_str("null"),
            JValue::Undefined => f.write_str("undefined"),
            JValue::Bool(b) => write!(f, "{}", b),
            // Non-finite numbers have no JSON form
            JValue::Number(n) if !n.is_finite() => f.write_str("null"),
            JValue::Number(n) => match as_integral(*n) {
                Some(i) => write!(f, "{}", i),
                None => write!(f, "{}", n),
            },
            JValue::String(s) => write_json_string(f, s),
            JValue::Array(items, _) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            JValue::Object(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write_json_string(f, key)?;
                    write!(f, ":{}", value)?;
                }
                f.write_str("}")
            }
            JValue::Lambda(_) => f.write_str("\"<lambda>\""),
            JValue::NativeFn(nf) => write!(f, "\"<native:{}>\"", nf.name),
            JValue::Partial(_) => f.write_str("\"<partial>\""),
            JValue::Regex { pattern, flags } => write!(f, "\"<regex:/{}/{}>\"", pattern, flags),
        }
    }
}

// ── Serialization ────────────────────────────────────────────────────────────

impl Serialize for JValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            // Absence and null both render as JSON null
            JValue::Null | JValue::Undefined => serializer.serialize_unit(),
            JValue::Bool(b) => serializer.serialize_bool(*b),
            JValue::Number(n) if !n.is_finite() => serializer.serialize_unit(),
            JValue::Number(n) => match as_integral(*n) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
            JValue::String(s) => serializer.serialize_str(s),
            JValue::Array(items, _) => serializer.collect_seq(items.iter()),
            JValue::Object(map) => serializer.collect_map(map.iter()),
            JValue::Lambda(_) | JValue::NativeFn(_) | JValue::Partial(_) => {
                serializer.serialize_str("")
            }
            JValue::Regex { pattern, flags } => {
                serializer.collect_map([("pattern", &**pattern), ("flags", &**flags)])
            }
        }
    }
}

// ── Deserialization ──────────────────────────────────────────────────────────

/// Untagged view of one JSON layer. Deserialization parses into this and
/// folds it into a `JValue`; the `Vec`/`IndexMap` element types recurse back
/// through `JValue`'s own `Deserialize`, so nesting needs no hand-written
/// visitor.
#[derive(Deserialize)]
#[serde(untagged)]
enum JsonLayer {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<JValue>),
    Map(IndexMap<String, JValue>),
    Null(()),
}

impl<'de> Deserialize<'de> for JValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match JsonLayer::deserialize(deserializer)? {
            JsonLayer::Null(()) => JValue::Null,
            JsonLayer::Bool(b) => JValue::Bool(b),
            JsonLayer::Number(n) => JValue::Number(n),
            JsonLayer::Text(s) => JValue::String(s.into()),
            JsonLayer::List(items) => JValue::array(items),
            JsonLayer::Map(map) => JValue::object(map),
        })
    }
}

// ── JSON string I/O ──────────────────────────────────────────────────────────

impl JValue {
    /// Serialize to a JSON string.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a JSON string into a JValue, preserving object key order.
    pub fn from_json_str(s: &str) -> Result<JValue, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// ── Conversion from/to serde_json::Value ─────────────────────────────────────

impl From<serde_json::Value> for JValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => JValue::Null,
            serde_json::Value::Bool(b) => JValue::Bool(b),
            serde_json::Value::Number(n) => JValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => JValue::String(s.into()),
            serde_json::Value::Array(arr) => {
                JValue::array(arr.into_iter().map(JValue::from).collect())
            }
            serde_json::Value::Object(map) => JValue::object(
                map.into_iter()
                    .map(|(k, v)| (k, JValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&JValue> for serde_json::Value {
    fn from(v: &JValue) -> Self {
        match v {
            JValue::Null | JValue::Undefined => serde_json::Value::Null,
            JValue::Bool(b) => serde_json::Value::Bool(*b),
            JValue::Number(n) if !n.is_finite() => serde_json::Value::Null,
            JValue::Number(n) => match as_integral(*n) {
                Some(i) => serde_json::json!(i),
                None => serde_json::json!(*n),
            },
            JValue::String(s) => serde_json::Value::String(s.to_string()),
            JValue::Array(items, _) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            JValue::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
            JValue::Lambda(_) | JValue::NativeFn(_) | JValue::Partial(_) => {
                serde_json::Value::Null
            }
            JValue::Regex { pattern, flags } => serde_json::json!({
                "pattern": &**pattern,
                "flags": &**flags,
            }),
        }
    }
}

// ── jvalue! macro ────────────────────────────────────────────────────────────

/// Macro for constructing JValue literals, similar to serde_json::json!
///
/// Usage:
///   jvalue!(null)           → JValue::Null
///   jvalue!(true)           → JValue::Bool(true)
///   jvalue!(42)             → JValue::Number(42.0)
///   jvalue!("hello")        → JValue::String(Rc::from("hello"))
///   jvalue!([1, 2, 3])      → JValue::Array(Rc::new(vec![...]), NONE)
///   jvalue!({"k": v, ...})  → JValue::Object(Rc::new(IndexMap from pairs))
///   jvalue!(expr)           → JValue::from(expr)
#[macro_export]
macro_rules! jvalue {
    (null) => {
        $crate::value::JValue::Null
    };

    (true) => {
        $crate::value::JValue::Bool(true)
    };

    (false) => {
        $crate::value::JValue::Bool(false)
    };

    ([ $($elem:tt),* $(,)? ]) => {
        $crate::value::JValue::array(vec![ $( $crate::jvalue!($elem) ),* ])
    };

    ({ $($key:tt : $val:tt),* $(,)? }) => {
        {
            let mut map = indexmap::IndexMap::new();
            $(
                map.insert(($key).to_string(), $crate::jvalue!($val));
            )*
            $crate::value::JValue::object(map)
        }
    };

    ($other:expr) => {
        $crate::value::JValue::from($other)
    };
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_is_cheap() {
        // Array clone should be O(1) — same Rc pointer
        let arr = JValue::array(vec![
            JValue::from(1i64),
            JValue::from(2i64),
            JValue::from(3i64),
        ]);
        let arr2 = arr.clone();
        if let (JValue::Array(a, _), JValue::Array(b, _)) = (&arr, &arr2) {
            assert!(Rc::ptr_eq(a, b));
        } else {
            panic!("expected arrays");
        }

        let mut map = IndexMap::new();
        map.insert("x".to_string(), JValue::from(1i64));
        let obj = JValue::object(map);
        let obj2 = obj.clone();
        if let (JValue::Object(a), JValue::Object(b)) = (&obj, &obj2) {
            assert!(Rc::ptr_eq(a, b));
        } else {
            panic!("expected objects");
        }
    }

    #[test]
    fn test_type_checks() {
        assert!(JValue::Null.is_null());
        assert!(JValue::Undefined.is_undefined());
        assert!(JValue::Bool(true).is_bool());
        assert!(JValue::Number(42.0).is_number());
        assert!(JValue::string("hello").is_string());
        assert!(JValue::array(vec![]).is_array());
        assert!(JValue::object(IndexMap::new()).is_object());
        assert!(JValue::regex(".*", "i").is_regex());
        assert!(JValue::sequence(vec![]).is_sequence());
        assert!(!JValue::array(vec![]).is_sequence());
        // null is present, not absent
        assert!(!JValue::Null.is_undefined());
    }

    #[test]
    fn test_extraction() {
        assert_eq!(JValue::Number(42.0).as_f64(), Some(42.0));
        assert_eq!(JValue::Number(42.0).as_i64(), Some(42));
        assert_eq!(JValue::Number(42.5).as_i64(), None);
        // beyond f64 integer precision there is no exact integer to give
        assert_eq!(JValue::Number(1e18).as_i64(), None);
        assert_eq!(JValue::string("hello").as_str(), Some("hello"));
        assert_eq!(JValue::Bool(true).as_bool(), Some(true));
        assert_eq!(
            JValue::array(vec![JValue::from(1i64)])
                .as_array()
                .map(|a| a.len()),
            Some(1)
        );

        let obj = jvalue!({"k": [10i64]});
        assert_eq!(
            obj.get("k").and_then(|v| v.get_index(0)),
            Some(&JValue::Number(10.0))
        );
        assert_eq!(obj.get("missing"), None);
        assert_eq!(JValue::Null.get("k"), None);
    }

    #[test]
    fn test_jvalue_macro() {
        let n = jvalue!(null);
        assert!(n.is_null());

        let b = jvalue!(true);
        assert_eq!(b.as_bool(), Some(true));

        let arr = jvalue!([1i64, 2i64, 3i64]);
        assert_eq!(arr.as_array().map(|a| a.len()), Some(3));

        let obj = jvalue!({"name": "Alice", "age": 30i64});
        assert_eq!(obj.get("name").and_then(|v| v.as_str()), Some("Alice"));
    }

    #[test]
    fn test_equality() {
        assert_eq!(JValue::Null, JValue::Null);
        assert_eq!(JValue::Bool(true), JValue::Bool(true));
        assert_ne!(JValue::Bool(true), JValue::Bool(false));
        assert_eq!(JValue::Number(42.0), JValue::Number(42.0));
        assert_ne!(JValue::Number(f64::NAN), JValue::Number(f64::NAN));
        assert_eq!(JValue::string("hello"), JValue::string("hello"));
        assert_ne!(JValue::Null, JValue::Undefined);
        // Flags don't affect value identity
        assert_eq!(
            JValue::sequence(vec![JValue::from(1i64)]),
            JValue::array(vec![JValue::from(1i64)])
        );
    }

    #[test]
    fn test_number_rendering() {
        assert_eq!(JValue::Number(2.0).to_json_string().unwrap(), "2");
        assert_eq!(JValue::Number(2.5).to_json_string().unwrap(), "2.5");
        assert_eq!(JValue::Number(f64::NAN).to_json_string().unwrap(), "null");
        assert_eq!(format!("{}", JValue::Number(-3.0)), "-3");
    }

    #[test]
    fn test_display_escapes_strings() {
        let v = jvalue!({"a\"b": "line\nbreak"});
        assert_eq!(format!("{}", v), r#"{"a\"b":"line\nbreak"}"#);
    }

    #[test]
    fn test_serde_roundtrip() {
        let v = jvalue!({"name": "Alice", "scores": [1i64, 2i64, 3i64], "active": true});
        let json_str = v.to_json_string().unwrap();
        let parsed = JValue::from_json_str(&json_str).unwrap();
        assert_eq!(v, parsed);
    }

    #[test]
    fn test_deserialize_all_json_kinds() {
        let v = JValue::from_json_str(
            r#"{"n": null, "b": false, "i": 3, "f": 2.5, "s": "x", "a": [1, {"d": true}]}"#,
        )
        .unwrap();
        assert_eq!(v.get("n"), Some(&JValue::Null));
        assert_eq!(v.get("b"), Some(&JValue::Bool(false)));
        assert_eq!(v.get("i"), Some(&JValue::Number(3.0)));
        assert_eq!(v.get("f"), Some(&JValue::Number(2.5)));
        assert_eq!(v.get("s"), Some(&JValue::string("x")));
        assert_eq!(
            v.get("a").and_then(|a| a.get_index(1)).and_then(|d| d.get("d")),
            Some(&JValue::Bool(true))
        );
    }

    #[test]
    fn test_from_serde_json() {
        let sv = serde_json::json!({"name": "Alice", "age": 30, "scores": [1, 2, 3]});
        let jv = JValue::from(sv);
        assert_eq!(jv.get("name").and_then(|v| v.as_str()), Some("Alice"));
        assert_eq!(jv.get("age").and_then(|v| v.as_f64()), Some(30.0));
    }

    #[test]
    fn test_key_order_preserved() {
        let jv = JValue::from_json_str(r#"{"z":1,"a":2,"m":3}"#).unwrap();
        let keys: Vec<&String> = jv.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
        assert_eq!(jv.to_json_string().unwrap(), r#"{"z":1,"a":2,"m":3}"#);
    }
}
