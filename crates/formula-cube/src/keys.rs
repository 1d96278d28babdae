//! Typed handles into the cube's slot maps.
//!
//! Removing a node, atom or datum frees its slot; a later insert that reuses the slot gets a
//! new version, so a stale handle resolves to nothing instead of to the newcomer.

use slotmap::Key;
use std::fmt;

slotmap::new_key_type! {
    /// Handle of a Data node.
    pub struct DataId;
    /// Handle of an interned atom.
    pub struct AtomId;
    /// Handle of a datum.
    pub struct DatumId;
}

macro_rules! display_key {
    ($name:ident, $prefix:literal) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{:?}"), self.data())
            }
        }
    };
}

display_key!(DataId, "data");
display_key!(AtomId, "atom");
display_key!(DatumId, "datum");
