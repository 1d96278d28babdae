use crate::atom::Atom;
use crate::cube::Cube;
use crate::keys::{AtomId, DataId, DatumId};
use crate::value::Value;
use smallvec::SmallVec;
use std::sync::Arc;

/// A value offered for interning: either a raw value or an atom interned earlier.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceValue {
    Value(Value),
    Atom(AtomId),
}

impl From<Value> for SourceValue {
    fn from(value: Value) -> Self {
        SourceValue::Value(value)
    }
}

impl From<AtomId> for SourceValue {
    fn from(atom: AtomId) -> Self {
        SourceValue::Atom(atom)
    }
}

macro_rules! source_from_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for SourceValue {
            fn from(value: $ty) -> Self {
                SourceValue::Value(Value::from(value))
            }
        })*
    };
}

source_from_value!(f64, i32, i64, bool, &str, String, Arc<str>);

/// One input row: dimension name → source value.
///
/// Dimensions a row does not mention resolve to the dimension's null atom.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    values: Vec<(String, SourceValue)>,
    is_virtual: bool,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, dimension: impl Into<String>, value: impl Into<SourceValue>) -> Self {
        self.set(dimension, value);
        self
    }

    pub fn set(&mut self, dimension: impl Into<String>, value: impl Into<SourceValue>) {
        let dimension = dimension.into();
        let value = value.into();
        match self.values.iter_mut().find(|(name, _)| *name == dimension) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((dimension, value)),
        }
    }

    /// Mark the row as produced by interpolation or trending; its datum and any atoms it
    /// creates are removed by [`Cube::clear_virtuals`].
    pub fn into_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn values(&self) -> &[(String, SourceValue)] {
        &self.values
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<SourceValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}

/// A row of a Data node: one atom per dimension plus state flags.
#[derive(Clone, Debug)]
pub struct Datum {
    pub(crate) id: DatumId,
    pub(crate) owner: DataId,
    pub(crate) key: Arc<str>,
    pub(crate) atoms: SmallVec<[AtomId; 8]>,
    pub(crate) is_null: bool,
    pub(crate) is_virtual: bool,
    pub(crate) is_selected: bool,
    pub(crate) is_visible: bool,
}

impl Datum {
    pub fn id(&self) -> DatumId {
        self.id
    }

    pub fn owner(&self) -> DataId {
        self.owner
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Atom handles, indexed like the cube's dimensions.
    pub fn atoms(&self) -> &[AtomId] {
        &self.atoms
    }

    /// Atom handle at `dimension`, or `None` past the last dimension.
    pub fn atom(&self, dimension: usize) -> Option<AtomId> {
        self.atoms.get(dimension).copied()
    }

    pub fn is_null(&self) -> bool {
        self.is_null
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn is_selected(&self) -> bool {
        self.is_selected
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible
    }
}

/// Read access to a datum and its atoms, handed to user predicates.
#[derive(Clone, Copy)]
pub struct DatumView<'a> {
    cube: &'a Cube,
    datum: &'a Datum,
}

impl<'a> DatumView<'a> {
    pub(crate) fn new(cube: &'a Cube, datum: &'a Datum) -> Self {
        Self { cube, datum }
    }

    pub fn datum(&self) -> &'a Datum {
        self.datum
    }

    pub fn id(&self) -> DatumId {
        self.datum.id
    }

    pub fn atom(&self, dimension: &str) -> Option<&'a Atom> {
        let idx = self.cube.complex_type().dimension_index(dimension).ok()?;
        self.cube.atom(self.datum.atoms[idx])
    }

    /// Typed value of `dimension`; `Value::Null` for unknown dimensions.
    pub fn value(&self, dimension: &str) -> &'a Value {
        const NULL: &Value = &Value::Null;
        self.atom(dimension).map(Atom::value).unwrap_or(NULL)
    }

    pub fn number(&self, dimension: &str) -> Option<f64> {
        self.value(dimension).as_number()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_existing_dimension() {
        let row = Row::new()
            .with("series", "A")
            .with("value", 1)
            .with("series", "B");
        assert_eq!(
            row.values(),
            &[
                ("series".to_string(), SourceValue::from("B")),
                ("value".to_string(), SourceValue::from(1)),
            ]
        );
    }

    #[test]
    fn rows_collect_from_pairs() {
        let row: Row = [("a", 1.0), ("b", 2.0)].into_iter().collect();
        assert_eq!(row.values().len(), 2);
        assert!(!row.is_virtual());
        assert!(row.into_virtual().is_virtual());
    }
}
