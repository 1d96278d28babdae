//! Indexed query execution.
//!
//! A query is planned once by [`Cube::select`]: each OR'd filter is answered either by walking a
//! cached group-by tree (following only children whose atom the filter accepts) or, when the
//! tree cannot answer it exactly, by scanning the node's datums. Iteration is lazy and driven
//! by an explicit stack, so a [`Selection`] can be iterated by several cursors and restarted.

use crate::cube::Cube;
use crate::error::{CubeError, CubeResult};
use crate::grouping::GroupingSpec;
use crate::keys::{DataId, DatumId};
use crate::query::{NormalizedFilter, NormalizedQuery, QueryArgs, QuerySpec};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug)]
enum FilterPlan {
    /// Every datum of the node.
    All(DataId),
    /// Walk `root` level by level; `levels[i]` holds the accepted child keys at depth `i + 1`.
    Indexed {
        root: DataId,
        levels: Vec<Vec<Arc<str>>>,
    },
    Scan {
        data: DataId,
        filter: NormalizedFilter,
    },
}

/// A planned query. Iterate it with [`Selection::iter`].
#[derive(Clone)]
pub struct Selection {
    plans: Vec<FilterPlan>,
    args: QueryArgs,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("plans", &self.plans)
            .field("args", &self.args)
            .finish()
    }
}

impl Selection {
    pub fn iter<'a>(&'a self, cube: &'a Cube) -> SelectionIter<'a> {
        let mut iter = SelectionIter {
            cube,
            selection: self,
            plan: 0,
            stack: Vec::new(),
            seen: HashSet::new(),
        };
        iter.reset();
        iter
    }

    /// Whether the query can match nothing at all.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Number of OR'd filters answered through a group-by tree.
    pub fn indexed_filter_count(&self) -> usize {
        self.plans
            .iter()
            .filter(|plan| matches!(plan, FilterPlan::Indexed { .. }))
            .count()
    }
}

#[derive(Clone, Copy, Debug)]
enum Frame {
    Visit { node: DataId, depth: usize },
    Emit { node: DataId, next: usize },
    Scan { data: DataId, next: usize },
}

/// Lazy cursor over the datums of a [`Selection`].
pub struct SelectionIter<'a> {
    cube: &'a Cube,
    selection: &'a Selection,
    plan: usize,
    stack: Vec<Frame>,
    seen: HashSet<DatumId>,
}

impl SelectionIter<'_> {
    /// Restart from the first datum.
    pub fn reset(&mut self) {
        self.plan = 0;
        self.seen.clear();
        self.start_plan();
    }

    fn start_plan(&mut self) {
        self.stack.clear();
        let Some(plan) = self.selection.plans.get(self.plan) else {
            return;
        };
        self.stack.push(match plan {
            FilterPlan::All(data) => Frame::Emit {
                node: *data,
                next: 0,
            },
            FilterPlan::Indexed { root, .. } => Frame::Visit {
                node: *root,
                depth: 0,
            },
            FilterPlan::Scan { data, .. } => Frame::Scan {
                data: *data,
                next: 0,
            },
        });
    }

    fn accept(&mut self, id: DatumId) -> bool {
        let Some(datum) = self.cube.datum(id) else {
            return false;
        };
        if !self.selection.args.accepts(self.cube, datum) {
            return false;
        }
        self.selection.plans.len() == 1 || self.seen.insert(id)
    }
}

impl Iterator for SelectionIter<'_> {
    type Item = DatumId;

    fn next(&mut self) -> Option<DatumId> {
        loop {
            let Some(frame) = self.stack.pop() else {
                if self.plan >= self.selection.plans.len() {
                    return None;
                }
                self.plan += 1;
                self.start_plan();
                continue;
            };

            match frame {
                Frame::Visit { node, depth } => {
                    let Some(FilterPlan::Indexed { levels, .. }) =
                        self.selection.plans.get(self.plan)
                    else {
                        continue;
                    };
                    let Some(data) = self.cube.data(node) else {
                        continue;
                    };
                    if depth == levels.len() {
                        self.stack.push(Frame::Emit { node, next: 0 });
                        continue;
                    }
                    for key in levels[depth].iter().rev() {
                        if let Some(child) = data.child_by_key(key) {
                            self.stack.push(Frame::Visit {
                                node: child,
                                depth: depth + 1,
                            });
                        }
                    }
                }
                Frame::Emit { node, next } => {
                    let Some(id) = self.cube.data(node).and_then(|d| d.datums().get(next)) else {
                        continue;
                    };
                    let id = *id;
                    self.stack.push(Frame::Emit {
                        node,
                        next: next + 1,
                    });
                    if self.accept(id) {
                        return Some(id);
                    }
                }
                Frame::Scan { data, next } => {
                    let Some(id) = self.cube.data(data).and_then(|d| d.datums().get(next)) else {
                        continue;
                    };
                    let id = *id;
                    self.stack.push(Frame::Scan {
                        data,
                        next: next + 1,
                    });
                    let matches = match self.selection.plans.get(self.plan) {
                        Some(FilterPlan::Scan { filter, .. }) => self
                            .cube
                            .datum(id)
                            .is_some_and(|datum| filter.accepts(datum)),
                        _ => false,
                    };
                    if matches && self.accept(id) {
                        return Some(id);
                    }
                }
            }
        }
    }
}

impl Cube {
    /// Plan `spec` over `data`. `None` selects every datum; state and `where_` filters of
    /// `args` apply either way.
    pub fn select(
        &mut self,
        data: DataId,
        spec: Option<&QuerySpec>,
        args: &QueryArgs,
    ) -> CubeResult<Selection> {
        let normalized = self.normalize_query(data, spec)?;
        let filters = match normalized {
            NormalizedQuery::All => {
                return Ok(Selection {
                    plans: vec![FilterPlan::All(data)],
                    args: args.clone(),
                })
            }
            NormalizedQuery::Filters(filters) => filters,
        };
        if filters.is_empty() {
            return Ok(Selection {
                plans: Vec::new(),
                args: args.clone(),
            });
        }

        let owner = self.owner_of(data)?;
        let mut plans = Vec::with_capacity(filters.len());
        let mut trees: HashMap<Vec<usize>, DataId> = HashMap::new();
        for filter in filters {
            let order = self.index_order(std::slice::from_ref(&filter), &args.order_by)?;
            match self.index_levels(owner, &filter, &order) {
                Some(levels) => {
                    let root = match trees.get(&order) {
                        Some(root) => *root,
                        None => {
                            let names = order
                                .iter()
                                .map(|dim| self.complex_type.dimension(*dim).name().to_string());
                            let spec = GroupingSpec::from_dimensions(names)?;
                            let root = self.group_by(data, &spec, &QueryArgs::default())?;
                            trees.insert(order, root);
                            root
                        }
                    };
                    plans.push(FilterPlan::Indexed { root, levels });
                }
                None => plans.push(FilterPlan::Scan { data, filter }),
            }
        }

        Ok(Selection {
            plans,
            args: args.clone(),
        })
    }

    /// Grouping order of the index tree answering `filters`: the requested order followed by
    /// any filtered dimension it misses, in name order.
    fn index_order(
        &self,
        filters: &[NormalizedFilter],
        order_by: &[String],
    ) -> CubeResult<Vec<usize>> {
        let filtered: BTreeSet<&str> = filters
            .iter()
            .flat_map(NormalizedFilter::dimensions)
            .map(|dim| self.complex_type.dimension(dim).name())
            .collect();

        let mut order = Vec::new();
        for name in order_by {
            if name.contains('|') {
                return Err(CubeError::invalid_argument(
                    "order_by",
                    format!("{name:?} groups several dimensions in one level"),
                ));
            }
            let dim = self.dim_index(name)?;
            if !order.contains(&dim) {
                order.push(dim);
            }
        }
        for name in filtered {
            let dim = self.dim_index(name)?;
            if !order.contains(&dim) {
                order.push(dim);
            }
        }
        Ok(order)
    }

    /// Accepted child keys per level, in tree order, when `filter` constrains exactly a prefix
    /// of `order` with non-null atoms; `None` when it must be answered by a scan.
    fn index_levels(
        &self,
        owner: DataId,
        filter: &NormalizedFilter,
        order: &[usize],
    ) -> Option<Vec<Vec<Arc<str>>>> {
        let depth = filter.constraints.len();
        if depth > order.len() {
            return None;
        }
        let mut levels = Vec::with_capacity(depth);
        for dim in &order[..depth] {
            let (_, atoms) = filter.constraints.iter().find(|(d, _)| d == dim)?;
            if atoms
                .iter()
                .any(|id| self.atoms.get(*id).is_none_or(|atom| atom.is_null()))
            {
                return None;
            }
            let mut atoms = atoms.clone();
            atoms.sort_by(|a, b| self.compare_atoms(owner, *dim, *a, *b));
            levels.push(atoms.iter().map(|id| self.group_key(&[*id])).collect());
        }
        Some(levels)
    }

    /// Datums of `data` matching `spec` and `args`, in index order.
    pub fn datums(
        &mut self,
        data: DataId,
        spec: Option<&QuerySpec>,
        args: &QueryArgs,
    ) -> CubeResult<Vec<DatumId>> {
        let selection = self.select(data, spec, args)?;
        Ok(selection.iter(self).collect())
    }

    pub fn datum_count(
        &mut self,
        data: DataId,
        spec: Option<&QuerySpec>,
        args: &QueryArgs,
    ) -> CubeResult<usize> {
        let selection = self.select(data, spec, args)?;
        Ok(selection.iter(self).count())
    }

    /// A node linked to `data` holding the datums that match `spec` and `args`. It keeps
    /// absorbing matching datums from later additive loads.
    pub fn where_view(
        &mut self,
        data: DataId,
        spec: Option<&QuerySpec>,
        args: &QueryArgs,
    ) -> CubeResult<DataId> {
        let predicate = self.compile_predicate(spec, args)?;
        let matching = self.datums(data, spec, args)?;
        let view = self.create_linked(data)?;
        self.node_mut(view)?.inclusion = Some(predicate);
        for id in matching {
            self.attach_to_derived(view, id)?;
        }
        log::debug!("created filtered view {view} of {data}");
        Ok(view)
    }
}
