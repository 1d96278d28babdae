use crate::keys::{AtomId, DataId};
use crate::value::Value;
use std::sync::Arc;

/// An interned dimension value.
///
/// Atoms are created only by the owner dimension and are compared by handle. Every other
/// dimension of the owner's tree holds references to them.
#[derive(Clone, Debug)]
pub struct Atom {
    pub(crate) id: AtomId,
    pub(crate) owner: DataId,
    pub(crate) dimension: usize,
    pub(crate) value: Value,
    pub(crate) raw: Value,
    pub(crate) label: Arc<str>,
    pub(crate) key: Arc<str>,
    pub(crate) is_virtual: bool,
    pub(crate) is_virtual_null: bool,
}

impl Atom {
    pub fn id(&self) -> AtomId {
        self.id
    }

    /// The owner Data node whose dimension interned this atom.
    pub fn owner(&self) -> DataId {
        self.owner
    }

    /// Index of the dimension in the cube's [`ComplexType`](crate::ComplexType).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The source value this atom was first interned from.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Interned by an interpolation/trend pass rather than by real data.
    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    /// The per-dimension placeholder referenced by datums that never supplied the dimension.
    pub fn is_virtual_null(&self) -> bool {
        self.is_virtual_null
    }
}
