//! Query specifications, their normalization against a node's atoms, and compiled predicates.

use crate::cube::Cube;
use crate::datum::{Datum, DatumView, SourceValue};
use crate::error::CubeResult;
use crate::keys::{AtomId, DataId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A user predicate over a datum.
pub type WherePredicate = Arc<dyn Fn(&DatumView<'_>) -> bool + Send + Sync>;

/// Conjunction of `dimension → one of values` constraints.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DatumFilterSpec {
    constraints: Vec<(String, Vec<SourceValue>)>,
}

impl DatumFilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `dimension` to hold one of `values`.
    pub fn with<V: Into<SourceValue>>(
        mut self,
        dimension: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.constraints
            .push((dimension.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn with_value(self, dimension: impl Into<String>, value: impl Into<SourceValue>) -> Self {
        self.with(dimension, [value.into()])
    }

    pub fn constraints(&self) -> &[(String, Vec<SourceValue>)] {
        &self.constraints
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

/// Disjunction of [`DatumFilterSpec`]s.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuerySpec {
    filters: Vec<DatumFilterSpec>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn or(mut self, filter: DatumFilterSpec) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(&self) -> &[DatumFilterSpec] {
        &self.filters
    }
}

impl From<DatumFilterSpec> for QuerySpec {
    fn from(filter: DatumFilterSpec) -> Self {
        QuerySpec::new().or(filter)
    }
}

impl FromIterator<DatumFilterSpec> for QuerySpec {
    fn from_iter<T: IntoIterator<Item = DatumFilterSpec>>(iter: T) -> Self {
        Self {
            filters: iter.into_iter().collect(),
        }
    }
}

/// Filters on datum state flags. `None` means "either".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StateFilter {
    pub is_null: Option<bool>,
    pub visible: Option<bool>,
    pub selected: Option<bool>,
}

impl StateFilter {
    pub fn accepts(&self, datum: &Datum) -> bool {
        self.is_null.is_none_or(|v| datum.is_null == v)
            && self.visible.is_none_or(|v| datum.is_visible == v)
            && self.selected.is_none_or(|v| datum.is_selected == v)
    }

    /// Whether results depend on selection or visibility, which change without a reload.
    pub fn is_state_dependent(&self) -> bool {
        self.visible.is_some() || self.selected.is_some()
    }

    pub fn key(&self) -> String {
        fn flag(v: Option<bool>) -> char {
            match v {
                None => '-',
                Some(true) => '1',
                Some(false) => '0',
            }
        }
        format!(
            "n{}v{}s{}",
            flag(self.is_null),
            flag(self.visible),
            flag(self.selected)
        )
    }
}

/// Arguments shared by queries, grouping and aggregates.
#[derive(Clone, Default)]
pub struct QueryArgs {
    pub state: StateFilter,
    pub where_: Option<WherePredicate>,
    /// Cache identity of `where_`. Without it, results involving `where_` are never cached.
    pub where_key: Option<String>,
    /// Grouping order used to index the query. Defaults to the filtered dimensions, sorted.
    pub order_by: Vec<String>,
}

impl fmt::Debug for QueryArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryArgs")
            .field("state", &self.state)
            .field("where_", &self.where_.is_some())
            .field("where_key", &self.where_key)
            .field("order_by", &self.order_by)
            .finish()
    }
}

impl QueryArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_is_null(mut self, is_null: bool) -> Self {
        self.state.is_null = Some(is_null);
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.state.visible = Some(visible);
        self
    }

    pub fn with_selected(mut self, selected: bool) -> Self {
        self.state.selected = Some(selected);
        self
    }

    pub fn with_where(
        mut self,
        key: Option<&str>,
        where_: impl Fn(&DatumView<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.where_ = Some(Arc::new(where_));
        self.where_key = key.map(str::to_string);
        self
    }

    pub fn with_order_by<S: Into<String>>(mut self, order_by: impl IntoIterator<Item = S>) -> Self {
        self.order_by = order_by.into_iter().map(Into::into).collect();
        self
    }

    /// Identity of the state and `where_` filters, or `None` when `where_` has no key.
    pub fn cache_key(&self) -> Option<String> {
        match (&self.where_, &self.where_key) {
            (Some(_), None) => None,
            (_, key) => Some(format!(
                "{}||{}",
                self.state.key(),
                key.as_deref().unwrap_or("")
            )),
        }
    }

    pub(crate) fn accepts(&self, cube: &Cube, datum: &Datum) -> bool {
        self.state.accepts(datum)
            && self
                .where_
                .as_ref()
                .is_none_or(|f| f(&DatumView::new(cube, datum)))
    }
}

/// One satisfiable filter with its values resolved to atoms, constraints sorted by dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct NormalizedFilter {
    pub(crate) constraints: Vec<(usize, Vec<AtomId>)>,
}

impl NormalizedFilter {
    pub(crate) fn accepts(&self, datum: &Datum) -> bool {
        self.constraints
            .iter()
            .all(|(dim, atoms)| atoms.contains(&datum.atoms[*dim]))
    }

    pub(crate) fn dimensions(&self) -> impl Iterator<Item = usize> + '_ {
        self.constraints.iter().map(|(dim, _)| *dim)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum NormalizedQuery {
    /// No query: every datum matches.
    All,
    /// OR of the satisfiable filters; empty when nothing can match.
    Filters(Vec<NormalizedFilter>),
}

/// A query compiled against atom keys, so it keeps its meaning for datums added later.
#[derive(Clone)]
pub struct DatumPredicate {
    filters: Option<Vec<Vec<(usize, HashSet<String>)>>>,
    state: StateFilter,
    where_: Option<WherePredicate>,
}

impl fmt::Debug for DatumPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatumPredicate")
            .field("filters", &self.filters)
            .field("state", &self.state)
            .field("where_", &self.where_.is_some())
            .finish()
    }
}

impl DatumPredicate {
    pub(crate) fn from_args(args: &QueryArgs) -> Self {
        Self {
            filters: None,
            state: args.state,
            where_: args.where_.clone(),
        }
    }

    pub fn matches(&self, cube: &Cube, datum: &Datum) -> bool {
        if !self.state.accepts(datum) {
            return false;
        }
        if let Some(filters) = &self.filters {
            let hit = filters.iter().any(|filter| {
                filter.iter().all(|(dim, keys)| {
                    cube.atom(datum.atoms[*dim])
                        .is_some_and(|atom| !atom.is_virtual_null && keys.contains(atom.key()))
                })
            });
            if !hit {
                return false;
            }
        }
        self.where_
            .as_ref()
            .is_none_or(|f| f(&DatumView::new(cube, datum)))
    }
}

impl Cube {
    /// Resolve `spec` against the atoms of `data`.
    pub(crate) fn normalize_query(
        &mut self,
        data: DataId,
        spec: Option<&QuerySpec>,
    ) -> CubeResult<NormalizedQuery> {
        let Some(spec) = spec else {
            return Ok(NormalizedQuery::All);
        };

        let mut filters = Vec::new();
        'filters: for filter in spec.filters() {
            let mut constraints: HashMap<usize, Vec<AtomId>> = HashMap::new();
            for (name, values) in filter.constraints() {
                let dim = self.dim_index(name)?;
                let mut atoms = Vec::new();
                for value in values {
                    if let Some(atom) = self.read_at(data, dim, value)? {
                        if !atoms.contains(&atom) {
                            atoms.push(atom);
                        }
                    }
                }
                let merged = match constraints.remove(&dim) {
                    Some(previous) => atoms.into_iter().filter(|a| previous.contains(a)).collect(),
                    None => atoms,
                };
                if merged.is_empty() {
                    continue 'filters;
                }
                constraints.insert(dim, merged);
            }
            if constraints.is_empty() {
                continue;
            }
            let mut constraints: Vec<(usize, Vec<AtomId>)> = constraints.into_iter().collect();
            constraints.sort_by_key(|(dim, _)| *dim);
            filters.push(NormalizedFilter { constraints });
        }
        Ok(NormalizedQuery::Filters(filters))
    }

    /// Compile `spec` and the state and `where_` filters of `args` into one predicate.
    pub fn compile_predicate(
        &self,
        spec: Option<&QuerySpec>,
        args: &QueryArgs,
    ) -> CubeResult<DatumPredicate> {
        let mut predicate = DatumPredicate::from_args(args);
        let Some(spec) = spec else {
            return Ok(predicate);
        };

        let mut filters = Vec::new();
        for filter in spec.filters() {
            if filter.is_empty() {
                continue;
            }
            let mut constraints: Vec<(usize, HashSet<String>)> = Vec::new();
            for (name, values) in filter.constraints() {
                let dim = self.dim_index(name)?;
                let keys: HashSet<String> = values
                    .iter()
                    .filter_map(|value| match value {
                        SourceValue::Value(raw) => Some(self.key_for(dim, raw)),
                        SourceValue::Atom(atom) => self
                            .atom(*atom)
                            .filter(|a| a.dimension() == dim && !a.is_virtual_null())
                            .map(|a| a.key().to_string()),
                    })
                    .collect();
                constraints.push((dim, keys));
            }
            filters.push(constraints);
        }
        predicate.filters = Some(filters);
        Ok(predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComplexType, DimensionType, ValueType};
    use crate::{LoadArgs, Row, Value};

    fn loaded() -> (Cube, DataId) {
        let mut cube = Cube::new(
            ComplexType::new(vec![
                DimensionType::new("series", ValueType::Text),
                DimensionType::new("category", ValueType::Text),
            ])
            .unwrap(),
        );
        let data = cube.create_owner();
        cube.load(
            data,
            [
                Row::new().with("series", "A").with("category", "x"),
                Row::new().with("series", "B").with("category", "y"),
            ],
            &LoadArgs::default(),
        )
        .unwrap();
        (cube, data)
    }

    #[test]
    fn unknown_values_make_a_filter_unsatisfiable() {
        let (mut cube, data) = loaded();
        let spec = QuerySpec::new()
            .or(DatumFilterSpec::new().with("series", ["Z"]))
            .or(DatumFilterSpec::new().with("series", ["A", "Z"]))
            .or(DatumFilterSpec::new());
        let NormalizedQuery::Filters(filters) = cube.normalize_query(data, Some(&spec)).unwrap()
        else {
            panic!("expected filters");
        };
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].constraints.len(), 1);
        assert_eq!(filters[0].constraints[0].1.len(), 1);
    }

    #[test]
    fn repeated_dimensions_intersect() {
        let (mut cube, data) = loaded();
        let spec: QuerySpec = DatumFilterSpec::new()
            .with("series", ["A", "B"])
            .with("series", ["B"])
            .into();
        let NormalizedQuery::Filters(filters) = cube.normalize_query(data, Some(&spec)).unwrap()
        else {
            panic!("expected filters");
        };
        let b = cube.read(data, "series", "B").unwrap().unwrap();
        assert_eq!(filters[0].constraints, vec![(0, vec![b])]);
    }

    #[test]
    fn unknown_dimension_is_reported() {
        let (mut cube, data) = loaded();
        let spec: QuerySpec = DatumFilterSpec::new().with_value("nope", "A").into();
        assert!(matches!(
            cube.normalize_query(data, Some(&spec)),
            Err(crate::CubeError::UnknownDimension(name)) if name == "nope"
        ));
    }

    #[test]
    fn compiled_predicate_matches_values_interned_later() {
        let (mut cube, data) = loaded();
        let spec: QuerySpec = DatumFilterSpec::new().with_value("series", "C").into();
        let predicate = cube.compile_predicate(Some(&spec), &QueryArgs::default()).unwrap();
        let added = cube
            .add(
                data,
                [Row::new().with("series", "C").with("category", "x")],
                &LoadArgs::default(),
            )
            .unwrap();
        let datum = cube.datum(added[0]).unwrap();
        assert!(predicate.matches(&cube, datum));
    }

    #[test]
    fn null_constraint_ignores_the_placeholder() {
        let (mut cube, data) = loaded();
        let added = cube
            .add(data, [Row::new().with("series", "C")], &LoadArgs::default())
            .unwrap();
        let spec: QuerySpec = DatumFilterSpec::new()
            .with_value("category", Value::Null)
            .into();
        let predicate = cube.compile_predicate(Some(&spec), &QueryArgs::default()).unwrap();
        assert!(!predicate.matches(&cube, cube.datum(added[0]).unwrap()));
    }

    #[test]
    fn cache_key_requires_where_key() {
        let args = QueryArgs::new().with_visible(true);
        assert_eq!(args.cache_key().as_deref(), Some("n-v1s-||"));
        let args = args.with_where(None, |_| true);
        assert_eq!(args.cache_key(), None);
        let args = QueryArgs::new().with_where(Some("positive"), |d| {
            d.number("value").is_some_and(|v| v > 0.0)
        });
        assert_eq!(args.cache_key().as_deref(), Some("n-v-s-||positive"));
    }
}
