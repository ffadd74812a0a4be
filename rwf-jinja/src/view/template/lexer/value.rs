//! The basic building block of our template language: the value.
//! All values like floats, integers, strings, lists, hashes, etc.
//! are represented using the value.
//!
//! Values produced at runtime only (modules, macros and native functions)
//! never appear in compiled code and are skipped by serialization.
use serde::{Deserialize, Serialize};

use super::super::runtime::{Function, Macro, Module};
use super::Error;

use std::collections::HashMap;
use std::sync::Arc;

/// A template value, e.g. `5` or `"hello world"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    /// Markup that must not be escaped again.
    Safe(String),
    Boolean(bool),
    List(Vec<Value>),
    Hash(HashMap<String, Value>),
    Null,
    #[serde(skip)]
    Module(Arc<Module>),
    #[serde(skip)]
    Macro(Arc<Macro>),
    #[serde(skip)]
    Function(Function),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a) | Value::Safe(a), Value::String(b) | Value::Safe(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Macro(a), Value::Macro(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) | Value::Safe(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    write!(f, "{}", v)?;
                    if i < l.len() - 1 {
                        write!(f, ", ")?;
                    }
                }
                write!(f, "]")
            }
            Value::Hash(h) => {
                let mut keys = h.keys().collect::<Vec<_>>();
                keys.sort();

                write!(f, "{{")?;
                for (i, k) in keys.iter().enumerate() {
                    write!(f, "{}: {}", k, h[k.as_str()])?;
                    if i < keys.len() - 1 {
                        write!(f, ", ")?;
                    }
                }
                write!(f, "}}")
            }
            Value::Null => write!(f, ""),
            Value::Module(module) => write!(f, "{}", module.render()),
            Value::Macro(m) => write!(f, "<macro {}>", m.name()),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
        }
    }
}

impl Value {
    /// If the value, when evaluated in the context of a `if` statement
    /// would result in the `if` statement being executed.
    ///
    /// e.g. `{% if 5 %}five is true{% endif %}`
    /// would output "five is true" since `5` is truthy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) | Value::Safe(s) => !s.is_empty(),
            Value::Null => false,
            Value::List(list) => !list.is_empty(),
            Value::Hash(hash) => !hash.is_empty(),
            Value::Module(_) | Value::Macro(_) | Value::Function(_) => true,
        }
    }

    /// Look up `value.name`. Missing attributes are `null`.
    pub fn attribute(&self, name: &str) -> Value {
        match self {
            Value::Hash(hash) => hash.get(name).cloned().unwrap_or(Value::Null),
            Value::Module(module) => module.export(name).unwrap_or(Value::Null),
            Value::List(list) => match name.parse::<usize>() {
                Ok(index) => list.get(index).cloned().unwrap_or(Value::Null),
                Err(_) => match name {
                    "length" => Value::Integer(list.len() as i64),
                    _ => Value::Null,
                },
            },
            Value::String(s) | Value::Safe(s) => match name {
                "length" => Value::Integer(s.chars().count() as i64),
                _ => Value::Null,
            },
            _ => Value::Null,
        }
    }

    /// Items produced by iterating over the value in a `for` loop.
    pub fn into_items(self) -> Result<Vec<Value>, Error> {
        match self {
            Value::List(list) => Ok(list),
            Value::Hash(hash) => {
                let mut keys = hash.into_keys().collect::<Vec<_>>();
                keys.sort();
                Ok(keys.into_iter().map(Value::String).collect())
            }
            Value::String(s) | Value::Safe(s) => {
                Ok(s.chars().map(|c| Value::String(c.to_string())).collect())
            }
            Value::Null => Ok(vec![]),
            value => Err(Error::NotIterable(value.to_string())),
        }
    }

    /// Invoke a macro or a native function.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        match self {
            Value::Macro(m) => m.clone().call(args).await,
            Value::Function(func) => func.call(args).await,
            value => Err(Error::NotCallable(value.to_string())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Safe(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Looks like a request object: a hash exposing both `method` and `url`.
    pub fn is_request_like(&self) -> bool {
        match self {
            Value::Hash(hash) => hash.contains_key("method") && hash.contains_key("url"),
            _ => false,
        }
    }

    /// The value is markup and must be printed without escaping.
    pub fn is_safe(&self) -> bool {
        matches!(self, Value::Safe(_) | Value::Module(_))
    }
}

pub trait ToTemplateValue {
    fn to_template_value(&self) -> Result<Value, Error>;
}

impl ToTemplateValue for Value {
    fn to_template_value(&self) -> Result<Value, Error> {
        Ok(self.clone())
    }
}

impl ToTemplateValue for String {
    fn to_template_value(&self) -> Result<Value, Error> {
        Ok(Value::String(self.clone()))
    }
}

impl ToTemplateValue for &str {
    fn to_template_value(&self) -> Result<Value, Error> {
        Ok(Value::String(self.to_string()))
    }
}

impl ToTemplateValue for bool {
    fn to_template_value(&self) -> Result<Value, Error> {
        Ok(Value::Boolean(*self))
    }
}

impl ToTemplateValue for f64 {
    fn to_template_value(&self) -> Result<Value, Error> {
        Ok(Value::Float(*self))
    }
}

impl ToTemplateValue for f32 {
    fn to_template_value(&self) -> Result<Value, Error> {
        Ok(Value::Float(*self as f64))
    }
}

macro_rules! impl_integer {
    ($ty:ty) => {
        impl ToTemplateValue for $ty {
            fn to_template_value(&self) -> Result<Value, Error> {
                Ok(Value::Integer(*self as i64))
            }
        }
    };
}

impl_integer!(i64);
impl_integer!(i32);
impl_integer!(i16);
impl_integer!(i8);
impl_integer!(u64); // Could very much overflow
impl_integer!(u32);
impl_integer!(u16);
impl_integer!(u8);
impl_integer!(usize);

impl ToTemplateValue for time::OffsetDateTime {
    fn to_template_value(&self) -> Result<Value, Error> {
        let fmt = time::format_description::well_known::Rfc2822;
        Ok(Value::String(self.format(&fmt)?))
    }
}

impl<T: ToTemplateValue> ToTemplateValue for Option<T> {
    fn to_template_value(&self) -> Result<Value, Error> {
        match self {
            Some(value) => value.to_template_value(),
            None => Ok(Value::Null),
        }
    }
}

impl<T: ToTemplateValue> ToTemplateValue for Vec<T> {
    fn to_template_value(&self) -> Result<Value, Error> {
        let mut list = vec![];
        for value in self {
            list.push(value.to_template_value()?);
        }
        Ok(Value::List(list))
    }
}

impl<T: ToTemplateValue> ToTemplateValue for HashMap<String, T> {
    fn to_template_value(&self) -> Result<Value, Error> {
        let mut hash = HashMap::new();
        for (key, value) in self {
            hash.insert(key.clone(), value.to_template_value()?);
        }
        Ok(Value::Hash(hash))
    }
}

impl ToTemplateValue for serde_json::Value {
    fn to_template_value(&self) -> Result<Value, Error> {
        use serde_json::Value as Json;

        Ok(match self {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Boolean(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Value::String(s.clone()),
            Json::Array(list) => Value::List(
                list.iter()
                    .map(|v| v.to_template_value())
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Json::Object(map) => {
                let mut hash = HashMap::new();
                for (key, value) in map {
                    hash.insert(key.clone(), value.to_template_value()?);
                }
                Value::Hash(hash)
            }
        })
    }
}
