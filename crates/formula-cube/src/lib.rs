//! In-memory dimensional data engine for Formula charts and pivots.
//!
//! This crate focuses on:
//! - Data nodes whose datums reference interned, ordered atoms (one per dimension).
//! - Incremental loading, with derived views and group-by trees that follow additive loads.
//! - Indexed queries over cached group-by trees, with a scan fallback that agrees with them.
//! - Hierarchical sums and percentages, and mark-and-sweep collection of unused atoms.

#![forbid(unsafe_code)]

mod aggregate;
mod keys;
mod atom;
mod cube;
mod data;
mod datum;
mod dimension;
mod error;
mod gc;
mod grouping;
mod index;
mod intern;
mod query;
mod types;
mod value;

pub use crate::keys::{AtomId, DataId, DatumId};
pub use crate::atom::Atom;
pub use crate::cube::{Cube, CubeOptions, CubeStats};
pub use crate::data::{DataNode, LoadArgs, SlidingWindow};
pub use crate::datum::{Datum, DatumView, Row, SourceValue};
pub use crate::types::{
    ComplexType, Comparer, Converter, DimensionType, Formatter, KeyFn, ValueType,
};
pub use crate::value::Value;

pub use crate::grouping::{GroupingDimension, GroupingLevel, GroupingSpec};
pub use crate::index::{Selection, SelectionIter};
pub use crate::query::{
    DatumFilterSpec, DatumPredicate, QueryArgs, QuerySpec, StateFilter, WherePredicate,
};

pub use crate::aggregate::{DimensionSum, Discriminator, DiscriminatorFn};

pub use crate::error::{CubeError, CubeResult};
