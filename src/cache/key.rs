//! Cache key generation.
//!
//! A key is `[namespace:]operation:<sha256 of the canonical call>`. The
//! canonical call text is built from type-tagged JSON values: positional
//! arguments in order, then keyword arguments sorted by name, so call-site
//! keyword order never changes the key. Every key of one operation shares
//! the prefix returned by [`CacheKeyGenerator::operation_prefix`].

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub key: String,
    pub operation: Option<String>,
    pub fingerprint: Option<String>,
}

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), operation: None, fingerprint: None }
    }
    pub fn with_operation(mut self, op: impl Into<String>) -> Self { self.operation = Some(op.into()); self }
    pub fn with_fingerprint(mut self, fp: impl Into<String>) -> Self { self.fingerprint = Some(fp.into()); self }
    pub fn as_str(&self) -> &str { &self.key }
    pub fn starts_with(&self, prefix: &str) -> bool { self.key.starts_with(prefix) }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.key) }
}

impl From<&str> for CacheKey { fn from(s: &str) -> Self { Self::new(s) } }
impl From<String> for CacheKey { fn from(s: String) -> Self { Self::new(s) } }

/// Identity-relevant arguments of one call, already reduced to JSON values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.push_arg(value)?;
        Ok(self)
    }

    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.push_kwarg(name, value)?;
        Ok(self)
    }

    pub fn push_arg<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let field = format!("args[{}]", self.positional.len());
        self.positional.push(to_key_value(value, field)?);
        Ok(())
    }

    pub fn push_kwarg<T: Serialize + ?Sized>(&mut self, name: impl Into<String>, value: &T) -> Result<()> {
        let name = name.into();
        let v = to_key_value(value, format!("kwargs.{}", name))?;
        self.keyword.insert(name, v);
        Ok(())
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Canonical text of the arguments: `(p0,p1;name=v,...)`.
    pub fn canonical(&self) -> String {
        let mut out = String::from("(");
        for (i, v) in self.positional.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_canonical(&mut out, v);
        }
        out.push(';');
        for (i, (name, v)) in self.keyword.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_quoted(&mut out, name);
            out.push('=');
            write_canonical(&mut out, v);
        }
        out.push(')');
        out
    }
}

fn to_key_value<T: Serialize + ?Sized>(value: &T, field: String) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        Error::key_derivation_with_context(
            "argument cannot be used as key material",
            ErrorContext::new()
                .with_field_path(field)
                .with_details(e.to_string())
                .with_source("key_derivation"),
        )
    })
}

fn write_quoted(out: &mut String, s: &str) {
    // Display of a JSON string value is its escaped, quoted form.
    let _ = write!(out, "{}", Value::from(s));
}

fn write_canonical(out: &mut String, v: &Value) {
    match v {
        Value::Null => out.push('n'),
        Value::Bool(b) => out.push_str(if *b { "b:1" } else { "b:0" }),
        Value::Number(n) => {
            let tag = if n.is_f64() { "f:" } else { "i:" };
            out.push_str(tag);
            let _ = write!(out, "{}", n);
        }
        Value::String(s) => {
            out.push_str("s:");
            write_quoted(out, s);
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (k, item)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_quoted(out, k);
                out.push('=');
                write_canonical(out, item);
            }
            out.push('}');
        }
    }
}

/// Anything that can describe the identity-relevant arguments of a call.
///
/// Context handles (API clients, connections) are not `KeyMaterial`; they are
/// passed to the computation separately and never reach the key.
pub trait KeyMaterial {
    fn to_call_args(&self) -> Result<CallArgs>;
}

impl KeyMaterial for CallArgs {
    fn to_call_args(&self) -> Result<CallArgs> {
        Ok(self.clone())
    }
}

impl KeyMaterial for () {
    fn to_call_args(&self) -> Result<CallArgs> {
        Ok(CallArgs::new())
    }
}

impl<T: KeyMaterial + ?Sized> KeyMaterial for &T {
    fn to_call_args(&self) -> Result<CallArgs> {
        (**self).to_call_args()
    }
}

macro_rules! impl_key_material_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: Serialize),+> KeyMaterial for ($($name,)+) {
            #[allow(non_snake_case)]
            fn to_call_args(&self) -> Result<CallArgs> {
                let ($($name,)+) = self;
                let mut args = CallArgs::new();
                $( args.push_arg($name)?; )+
                Ok(args)
            }
        }
    };
}

impl_key_material_for_tuple!(A);
impl_key_material_for_tuple!(A, B);
impl_key_material_for_tuple!(A, B, C);
impl_key_material_for_tuple!(A, B, C, D);
impl_key_material_for_tuple!(A, B, C, D, E);
impl_key_material_for_tuple!(A, B, C, D, E, F);

/// Keyword arguments taken from a value that serializes to a map
/// (typically a `#[derive(Serialize)]` filter struct).
pub struct Kwargs<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> KeyMaterial for Kwargs<'_, T> {
    fn to_call_args(&self) -> Result<CallArgs> {
        match to_key_value(self.0, "kwargs".to_string())? {
            Value::Object(map) => {
                let mut args = CallArgs::new();
                args.keyword.extend(map);
                Ok(args)
            }
            Value::Null => Ok(CallArgs::new()),
            other => Err(Error::key_derivation_with_context(
                "keyword arguments must serialize to a map",
                ErrorContext::new()
                    .with_field_path("kwargs")
                    .with_details(format!("got {}", json_kind(&other)))
                    .with_source("key_derivation"),
            )),
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    namespace: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self { Self { namespace: None } }
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self { self.namespace = Some(ns.into()); self }
    pub fn namespace(&self) -> Option<&str> { self.namespace.as_deref() }

    pub fn generate<A: KeyMaterial + ?Sized>(&self, operation: &str, args: &A) -> Result<CacheKey> {
        let args = args.to_call_args()?;
        self.generate_from_args(operation, &args)
    }

    pub fn generate_from_args(&self, operation: &str, args: &CallArgs) -> Result<CacheKey> {
        validate_operation(operation)?;
        let mut material = String::new();
        write_quoted(&mut material, operation);
        material.push_str(&args.canonical());
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        let hash: String = hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect();
        let key = format!("{}{}", self.operation_prefix(operation), hash);
        Ok(CacheKey::new(key).with_operation(operation).with_fingerprint(hash))
    }

    /// Prefix shared by every key derived for `operation`.
    pub fn operation_prefix(&self, operation: &str) -> String {
        self.namespaced(&format!("{}:", operation))
    }

    /// Apply the namespace to a logical prefix or key.
    pub fn namespaced(&self, raw: &str) -> String {
        match self.namespace {
            Some(ref ns) => format!("{}:{}", ns, raw),
            None => raw.to_string(),
        }
    }
}

fn validate_operation(operation: &str) -> Result<()> {
    if operation.trim().is_empty() {
        return Err(Error::key_derivation_with_context(
            "operation name must not be empty",
            ErrorContext::new().with_field_path("operation").with_source("key_derivation"),
        ));
    }
    // ':' separates key segments; an operation `a:b` would fall under the prefix of `a`.
    if operation.contains(':') {
        return Err(Error::key_derivation_with_context(
            "operation name must not contain ':'",
            ErrorContext::new()
                .with_field_path("operation")
                .with_details(format!("got '{}'", operation))
                .with_source("key_derivation"),
        ));
    }
    Ok(())
}
