// SPDX-License-Identifier: MIT OR Apache-2.0
//! Value types that can flow through ports, and the registry resolving
//! type tags to them.

use crate::error::{GraphError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

/// Data type that can flow through ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// 2D vector
    Vector2,
    /// 3D vector
    Vector3,
    /// 4D vector
    Vector4,
    /// Color (RGBA)
    Color,
    /// String value
    String,
}

impl ValueType {
    /// Canonical tag of this type
    pub fn tag(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Vector2 => "vector2",
            Self::Vector3 => "vector3",
            Self::Vector4 => "vector4",
            Self::Color => "color",
            Self::String => "string",
        }
    }

    /// Zero value used when a type has no default factory
    pub fn zero(self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::Float => Value::Float(0.0),
            Self::Vector2 => Value::Vector2([0.0; 2]),
            Self::Vector3 => Value::Vector3([0.0; 3]),
            Self::Vector4 => Value::Vector4([0.0; 4]),
            Self::Color => Value::Color([0.0; 4]),
            Self::String => Value::String(String::new()),
        }
    }

    /// All built-in types, in declaration order
    pub fn all() -> [ValueType; 8] {
        [
            Self::Bool,
            Self::Int,
            Self::Float,
            Self::Vector2,
            Self::Vector3,
            Self::Vector4,
            Self::Color,
            Self::String,
        ]
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Value that can be stored in a port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i32),
    /// Float
    Float(f32),
    /// 2D vector
    Vector2([f32; 2]),
    /// 3D vector
    Vector3([f32; 3]),
    /// 4D vector
    Vector4([f32; 4]),
    /// Color
    Color([f32; 4]),
    /// String
    String(String),
}

impl Value {
    /// Get the value type for this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::Vector2(_) => ValueType::Vector2,
            Self::Vector3(_) => ValueType::Vector3,
            Self::Vector4(_) => ValueType::Vector4,
            Self::Color(_) => ValueType::Color,
            Self::String(_) => ValueType::String,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Vector2(v) => write!(f, "{v:?}"),
            Self::Vector3(v) => write!(f, "{v:?}"),
            Self::Vector4(v) | Self::Color(v) => write!(f, "{v:?}"),
            Self::String(v) => write!(f, "{v:?}"),
        }
    }
}

/// RGBA color, distinct from a plain 4D vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rgba(pub [f32; 4]);

/// Rust types that map one-to-one onto a [`ValueType`]
pub trait PortData: Sized + Default {
    /// The value type this Rust type represents
    const VALUE_TYPE: ValueType;

    /// Extract from a value of the matching type
    fn from_value(value: &Value) -> Option<Self>;

    /// Wrap into a value
    fn into_value(self) -> Value;
}

macro_rules! impl_port_data {
    ($ty:ty, $variant:ident) => {
        impl PortData for $ty {
            const VALUE_TYPE: ValueType = ValueType::$variant;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }

        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value)
            }
        }
    };
}

impl_port_data!(bool, Bool);
impl_port_data!(i32, Int);
impl_port_data!(f32, Float);
impl_port_data!([f32; 2], Vector2);
impl_port_data!([f32; 3], Vector3);
impl_port_data!([f32; 4], Vector4);
impl_port_data!(String, String);

impl PortData for Rgba {
    const VALUE_TYPE: ValueType = ValueType::Color;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Color(c) => Some(Rgba(*c)),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Color(self.0)
    }
}

impl From<Rgba> for Value {
    fn from(value: Rgba) -> Self {
        Value::Color(value.0)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

/// Declaration of a value type in the registry
#[derive(Debug, Clone)]
pub struct ValueTypeDescriptor {
    /// Type this declaration describes
    pub value_type: ValueType,
    /// Extra tags resolving to this type (matched case-insensitively)
    pub aliases: Vec<String>,
    /// Default-value factory; the zero value is used when absent
    pub default: Option<fn() -> Value>,
}

impl ValueTypeDescriptor {
    /// Describe a type with no aliases and a zero default
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            aliases: Vec::new(),
            default: None,
        }
    }

    /// Add an alias tag
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Set the default-value factory
    pub fn with_default(mut self, default: fn() -> Value) -> Self {
        self.default = Some(default);
        self
    }

    fn matches(&self, tag: &str) -> bool {
        self.value_type.tag().eq_ignore_ascii_case(tag)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(tag))
    }
}

/// Closed set of value types available to ports.
///
/// Tags are resolved against the registered descriptors only. A successful
/// lookup is cached; an unknown tag is an error, never a fallback.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    descriptors: IndexMap<ValueType, ValueTypeDescriptor>,
    resolved: RefCell<HashMap<String, ValueType>>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in type and its common aliases
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        registry.register(ValueTypeDescriptor::new(ValueType::Bool).with_alias("boolean"));
        registry.register(
            ValueTypeDescriptor::new(ValueType::Int)
                .with_alias("integer")
                .with_alias("i32"),
        );
        registry.register(
            ValueTypeDescriptor::new(ValueType::Float)
                .with_alias("single")
                .with_alias("f32"),
        );
        registry.register(ValueTypeDescriptor::new(ValueType::Vector2).with_alias("vec2"));
        registry.register(ValueTypeDescriptor::new(ValueType::Vector3).with_alias("vec3"));
        registry.register(ValueTypeDescriptor::new(ValueType::Vector4).with_alias("vec4"));
        registry.register(
            ValueTypeDescriptor::new(ValueType::Color)
                .with_alias("rgba")
                .with_default(|| Value::Color([1.0, 1.0, 1.0, 1.0])),
        );
        registry.register(ValueTypeDescriptor::new(ValueType::String).with_alias("text"));
        registry
    }

    /// Register or replace the declaration of a type
    pub fn register(&mut self, descriptor: ValueTypeDescriptor) {
        self.resolved.get_mut().clear();
        self.descriptors.insert(descriptor.value_type, descriptor);
    }

    /// Resolve a tag to its value type
    pub fn resolve(&self, tag: &str) -> Result<ValueType> {
        if let Some(ty) = self.resolved.borrow().get(tag) {
            return Ok(*ty);
        }

        let ty = self
            .descriptors
            .values()
            .find(|d| d.matches(tag))
            .map(|d| d.value_type)
            .ok_or_else(|| GraphError::UnknownType(tag.to_string()))?;

        self.resolved.borrow_mut().insert(tag.to_string(), ty);
        Ok(ty)
    }

    /// Default value for a type. Never fails.
    pub fn default_value(&self, value_type: ValueType) -> Value {
        let produced = self
            .descriptors
            .get(&value_type)
            .and_then(|d| d.default)
            .map(|factory| factory());

        match produced {
            Some(value) if value.value_type() == value_type => value,
            Some(value) => {
                tracing::warn!(
                    "Default factory for {value_type} produced a {} value, using zero",
                    value.value_type()
                );
                value_type.zero()
            }
            None => value_type.zero(),
        }
    }

    /// Default value for the Rust type `T`
    pub fn default_of<T: PortData>(&self) -> T {
        T::from_value(&self.default_value(T::VALUE_TYPE)).unwrap_or_default()
    }

    /// Registered types, in registration order
    pub fn types(&self) -> impl Iterator<Item = ValueType> + '_ {
        self.descriptors.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_tags_and_aliases() {
        let registry = TypeRegistry::with_builtin_types();
        assert_eq!(registry.resolve("float").unwrap(), ValueType::Float);
        assert_eq!(registry.resolve("Single").unwrap(), ValueType::Float);
        assert_eq!(registry.resolve("vec3").unwrap(), ValueType::Vector3);
        // Second lookup hits the cache
        assert_eq!(registry.resolve("Single").unwrap(), ValueType::Float);
    }

    #[test]
    fn test_unknown_tag_fails() {
        let registry = TypeRegistry::with_builtin_types();
        let err = registry.resolve("object").unwrap_err();
        assert!(matches!(err, GraphError::UnknownType(tag) if tag == "object"));
    }

    #[test]
    fn test_closed_registry() {
        let mut registry = TypeRegistry::new();
        registry.register(ValueTypeDescriptor::new(ValueType::Int));
        assert!(registry.resolve("int").is_ok());
        assert!(registry.resolve("float").is_err());
    }

    #[test]
    fn test_default_values() {
        let registry = TypeRegistry::with_builtin_types();
        assert_eq!(registry.default_value(ValueType::Float), Value::Float(0.0));
        assert_eq!(
            registry.default_value(ValueType::Color),
            Value::Color([1.0, 1.0, 1.0, 1.0])
        );
        assert_eq!(registry.default_of::<String>(), String::new());
        assert_eq!(registry.default_of::<Rgba>(), Rgba([1.0; 4]));
    }

    #[test]
    fn test_bad_factory_falls_back_to_zero() {
        let mut registry = TypeRegistry::new();
        registry.register(ValueTypeDescriptor::new(ValueType::Int).with_default(|| Value::Bool(true)));
        assert_eq!(registry.default_value(ValueType::Int), Value::Int(0));
    }

    #[test]
    fn test_port_data_conversion() {
        assert_eq!(f32::from_value(&Value::Float(2.5)), Some(2.5));
        assert_eq!(f32::from_value(&Value::Int(2)), None);
        assert_eq!(Value::from(7_i32), Value::Int(7));
        assert_eq!(Value::from(Rgba([0.5; 4])).value_type(), ValueType::Color);
    }
}
