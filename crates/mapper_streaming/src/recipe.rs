//! A duplicate-tolerant YAML value for rendered recipes.
//!
//! Rendered `meta.yaml` files in the wild occasionally contain duplicate
//! mapping keys, which strict YAML decoding rejects. The extraction pipeline
//! only needs to look a couple of fields deep into the recipe, so recipes are
//! decoded into [`LenientValue`], a minimal value tree whose map visitor
//! keeps the last occurrence of a duplicated key.

use std::fmt;

use indexmap::IndexMap;
use serde::{
    de::{MapAccess, SeqAccess, Visitor},
    Deserialize, Deserializer,
};

/// A YAML value with last-wins duplicate key handling.
#[derive(Debug, Clone, PartialEq)]
pub enum LenientValue {
    /// A null value, including YAML's `~`.
    Null,
    /// A boolean.
    Bool(bool),
    /// Any numeric scalar, kept in its string representation.
    Number(String),
    /// A string scalar.
    String(String),
    /// A sequence of values.
    Sequence(Vec<LenientValue>),
    /// A mapping with string-converted keys.
    Mapping(IndexMap<String, LenientValue>),
}

impl LenientValue {
    /// Parses a YAML document.
    pub fn from_yaml_str(input: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(input)
    }

    /// Looks up a key when this value is a mapping.
    pub fn get(&self, key: &str) -> Option<&LenientValue> {
        match self {
            LenientValue::Mapping(mapping) => mapping.get(key),
            _ => None,
        }
    }

    /// The value as a string scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LenientValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// The value as a sequence.
    pub fn as_sequence(&self) -> Option<&[LenientValue]> {
        match self {
            LenientValue::Sequence(values) => Some(values),
            _ => None,
        }
    }

    /// The value as a mapping.
    pub fn as_mapping(&self) -> Option<&IndexMap<String, LenientValue>> {
        match self {
            LenientValue::Mapping(mapping) => Some(mapping),
            _ => None,
        }
    }

    /// Collects the value into a list of strings: a string scalar becomes a
    /// single-element list, a sequence contributes its string elements.
    /// Recipes write `url` both as a scalar and as a list.
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        match self {
            LenientValue::String(value) => Some(vec![value.clone()]),
            LenientValue::Sequence(values) => Some(
                values
                    .iter()
                    .filter_map(|value| value.as_str().map(ToOwned::to_owned))
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for LenientValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LenientVisitor;

        impl<'de> Visitor<'de> for LenientVisitor {
            type Value = LenientValue;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("any yaml value")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(LenientValue::Null)
            }

            fn visit_none<E>(self) -> Result<Self::Value, E> {
                Ok(LenientValue::Null)
            }

            fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E> {
                Ok(LenientValue::Bool(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E> {
                Ok(LenientValue::Number(value.to_string()))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E> {
                Ok(LenientValue::Number(value.to_string()))
            }

            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E> {
                Ok(LenientValue::Number(value.to_string()))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E> {
                Ok(LenientValue::String(value.to_owned()))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E> {
                Ok(LenientValue::String(value))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element()? {
                    values.push(value);
                }
                Ok(LenientValue::Sequence(values))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut mapping = IndexMap::new();
                while let Some((key, value)) =
                    map.next_entry::<LenientValue, LenientValue>()?
                {
                    let key = match key {
                        LenientValue::String(key) => key,
                        LenientValue::Number(key) => key,
                        LenientValue::Bool(key) => key.to_string(),
                        LenientValue::Null => String::from("~"),
                        // composite keys are not something a recipe contains
                        other => format!("{other:?}"),
                    };
                    // last occurrence of a duplicated key wins
                    mapping.insert(key, value);
                }
                Ok(LenientValue::Mapping(mapping))
            }
        }

        deserializer.deserialize_any(LenientVisitor)
    }
}
