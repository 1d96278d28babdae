use crate::error::{CubeError, CubeResult};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type Converter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
pub type KeyFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;
pub type Comparer = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;
pub type Formatter = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// The value domain of a dimension. Drives the cast applied to every interned value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Any,
    Text,
    Number,
    Boolean,
    Date,
}

impl ValueType {
    /// Continuous dimensions get a natural comparer by default.
    pub fn is_continuous(self) -> bool {
        matches!(self, ValueType::Number | ValueType::Date)
    }

    /// Normalize a typed value into this domain. Values that cannot be represented become
    /// `Value::Null`.
    pub fn cast(self, value: Value) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (ValueType::Any, v) => v,

            (ValueType::Text, Value::Text(s)) => Value::Text(s),
            (ValueType::Text, v) => Value::from(v.to_string()),

            (ValueType::Number, Value::Number(n)) => Value::Number(n),
            (ValueType::Number, Value::Boolean(b)) => Value::from(if b { 1.0 } else { 0.0 }),
            (ValueType::Number, Value::Date(ms)) => Value::from(ms as f64),
            (ValueType::Number, Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => Value::from(n),
                _ => {
                    log::warn!("value {s:?} is not numeric; interning it as null");
                    Value::Null
                }
            },

            (ValueType::Boolean, Value::Boolean(b)) => Value::Boolean(b),
            (ValueType::Boolean, Value::Number(n)) => Value::Boolean(n.0 != 0.0),
            (ValueType::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Value::Boolean(true),
                "false" | "0" | "no" => Value::Boolean(false),
                _ => Value::Null,
            },
            (ValueType::Boolean, Value::Date(_)) => Value::Null,

            (ValueType::Date, Value::Date(ms)) => Value::Date(ms),
            (ValueType::Date, Value::Number(n)) if n.0.is_finite() => Value::Date(n.0 as i64),
            (ValueType::Date, Value::Text(s)) => match Value::parse_date(&s) {
                Some(ms) => Value::Date(ms),
                None => {
                    log::warn!("value {s:?} is not a date; interning it as null");
                    Value::Null
                }
            },
            (ValueType::Date, _) => Value::Null,
        }
    }
}

/// Column definition: how raw values of one dimension are converted, keyed, ordered and
/// labeled.
#[derive(Clone)]
pub struct DimensionType {
    name: String,
    label: Option<String>,
    value_type: ValueType,
    is_discrete: bool,
    converter: Option<Converter>,
    key: Option<KeyFn>,
    comparer: Option<Comparer>,
    formatter: Option<Formatter>,
}

impl fmt::Debug for DimensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DimensionType")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("is_discrete", &self.is_discrete)
            .field("has_converter", &self.converter.is_some())
            .field("has_key", &self.key.is_some())
            .field("has_comparer", &self.comparer.is_some())
            .field("has_formatter", &self.formatter.is_some())
            .finish()
    }
}

impl DimensionType {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        let comparer: Option<Comparer> = value_type
            .is_continuous()
            .then(|| Arc::new(|a: &Value, b: &Value| a.natural_cmp(b)) as Comparer);
        Self {
            name: name.into(),
            label: None,
            value_type,
            is_discrete: !value_type.is_continuous(),
            converter: None,
            key: None,
            comparer,
            formatter: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_discrete(mut self, is_discrete: bool) -> Self {
        self.is_discrete = is_discrete;
        self
    }

    pub fn with_converter(
        mut self,
        converter: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    pub fn with_key(mut self, key: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        self.key = Some(Arc::new(key));
        self
    }

    pub fn with_comparer(
        mut self,
        comparer: impl Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.comparer = Some(Arc::new(comparer));
        self
    }

    /// Keep atoms in insertion order, even for continuous value types.
    pub fn without_comparer(mut self) -> Self {
        self.comparer = None;
        self
    }

    pub fn with_formatter(
        mut self,
        formatter: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) -> Self {
        self.formatter = Some(Arc::new(formatter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn is_discrete(&self) -> bool {
        self.is_discrete
    }

    pub fn has_comparer(&self) -> bool {
        self.comparer.is_some()
    }

    pub(crate) fn comparer(&self) -> Option<&Comparer> {
        self.comparer.as_ref()
    }

    /// Raw → typed. Runs the converter (if any) and then the value-type cast.
    pub fn typed_value(&self, raw: &Value) -> Value {
        let converted = match &self.converter {
            Some(convert) => convert(raw),
            None => raw.clone(),
        };
        if converted.is_null_or_empty() {
            return Value::Null;
        }
        let cast = self.value_type.cast(converted);
        if cast.is_null_or_empty() {
            Value::Null
        } else {
            cast
        }
    }

    pub fn key_of(&self, value: &Value) -> String {
        if value.is_null() {
            return String::new();
        }
        match &self.key {
            Some(key) => key(value),
            None => value.key(),
        }
    }

    pub fn format(&self, value: &Value) -> String {
        match &self.formatter {
            Some(format) => format(value),
            None => value.to_string(),
        }
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Option<Ordering> {
        self.comparer.as_ref().map(|cmp| cmp(a, b))
    }
}

/// The ordered set of dimensions shared by every Data node of a cube.
#[derive(Clone, Debug)]
pub struct ComplexType {
    dimensions: Vec<DimensionType>,
    index: HashMap<String, usize>,
}

impl ComplexType {
    pub fn new(dimensions: Vec<DimensionType>) -> CubeResult<Self> {
        let mut index = HashMap::with_capacity(dimensions.len());
        for (idx, dim) in dimensions.iter().enumerate() {
            if dim.name.is_empty() {
                return Err(CubeError::ArgumentRequired("dimension name".to_string()));
            }
            if index.insert(dim.name.clone(), idx).is_some() {
                return Err(CubeError::invalid_argument(
                    "dimensions",
                    format!("duplicate dimension {}", dim.name),
                ));
            }
        }
        Ok(Self { dimensions, index })
    }

    pub fn dimensions(&self) -> &[DimensionType] {
        &self.dimensions
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn dimension(&self, idx: usize) -> &DimensionType {
        &self.dimensions[idx]
    }

    pub fn dimension_index(&self, name: &str) -> CubeResult<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| CubeError::UnknownDimension(name.to_string()))
    }

    pub fn dimension_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.dimensions.iter().map(|d| d.name.as_str())
    }
}
