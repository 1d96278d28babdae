//! Group-by trees.
//!
//! [`Cube::group_by`] derives a tree from a Data node: a root linked to the source node and one
//! child per distinct atom tuple at each level. Trees are cached on the source node and kept up
//! to date by additive loads.

use crate::cube::Cube;
use crate::error::{CubeError, CubeResult};
use crate::keys::{AtomId, DataId, DatumId};
use crate::query::{DatumPredicate, QueryArgs};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupingDimension {
    pub name: String,
    pub descending: bool,
}

impl GroupingDimension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descending: false,
        }
    }

    pub fn descending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descending: true,
        }
    }
}

/// One level of a grouping tree. Several dimensions group by their atom tuple.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupingLevel {
    pub dimensions: Vec<GroupingDimension>,
}

impl GroupingLevel {
    pub fn new(dimensions: Vec<GroupingDimension>) -> Self {
        Self { dimensions }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupingSpec {
    levels: Vec<GroupingLevel>,
    key: String,
}

impl GroupingSpec {
    pub fn new(levels: Vec<GroupingLevel>) -> CubeResult<Self> {
        if levels.is_empty() {
            return Err(CubeError::ArgumentRequired("grouping levels".to_string()));
        }
        if levels.iter().any(|level| level.dimensions.is_empty()) {
            return Err(CubeError::invalid_argument(
                "grouping levels",
                "a level has no dimensions",
            ));
        }
        let key = levels
            .iter()
            .map(|level| {
                level
                    .dimensions
                    .iter()
                    .map(|d| {
                        if d.descending {
                            format!("{} desc", d.name)
                        } else {
                            d.name.clone()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("|")
            })
            .collect::<Vec<_>>()
            .join(",");
        Ok(Self { levels, key })
    }

    /// One ascending single-dimension level per name.
    pub fn from_dimensions<S: Into<String>>(
        names: impl IntoIterator<Item = S>,
    ) -> CubeResult<Self> {
        Self::new(
            names
                .into_iter()
                .map(|name| GroupingLevel::new(vec![GroupingDimension::new(name)]))
                .collect(),
        )
    }

    /// Parse `"series asc, category|region desc"`: levels separated by `,`, dimensions of a
    /// level by `|`, each optionally followed by `asc` or `desc`.
    pub fn parse(text: &str) -> CubeResult<Self> {
        if text.trim().is_empty() {
            return Err(CubeError::ArgumentRequired("grouping spec".to_string()));
        }
        let mut levels = Vec::new();
        for level_text in text.split(',') {
            let mut dimensions = Vec::new();
            for dim_text in level_text.split('|') {
                let mut words = dim_text.split_whitespace();
                let name = words.next().ok_or_else(|| {
                    CubeError::invalid_argument("grouping spec", format!("empty entry in {text:?}"))
                })?;
                let descending = match words.next().map(str::to_ascii_lowercase).as_deref() {
                    None | Some("asc") => false,
                    Some("desc") => true,
                    Some(other) => {
                        return Err(CubeError::invalid_argument(
                            "grouping spec",
                            format!("unknown direction {other:?} for {name}"),
                        ))
                    }
                };
                if let Some(extra) = words.next() {
                    return Err(CubeError::invalid_argument(
                        "grouping spec",
                        format!("unexpected {extra:?} after {name}"),
                    ));
                }
                dimensions.push(GroupingDimension {
                    name: name.to_string(),
                    descending,
                });
            }
            levels.push(GroupingLevel::new(dimensions));
        }
        Self::new(levels)
    }

    pub fn levels(&self) -> &[GroupingLevel] {
        &self.levels
    }

    /// Canonical text of the spec; two specs with the same key build the same tree.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

impl FromStr for GroupingSpec {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for GroupingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Resolved levels of a grouping root: `(dimension index, descending)` per level.
#[derive(Clone, Debug)]
pub(crate) struct GroupingState {
    pub(crate) levels: Vec<Vec<(usize, bool)>>,
    pub(crate) key: String,
    pub(crate) state_dependent: bool,
}

impl Cube {
    /// Group the datums of `data` accepted by `args` into a tree following `spec`. Returns the
    /// tree's root, reusing a cached tree when `args` has a cache identity.
    pub fn group_by(
        &mut self,
        data: DataId,
        spec: &GroupingSpec,
        args: &QueryArgs,
    ) -> CubeResult<DataId> {
        let levels = spec
            .levels()
            .iter()
            .map(|level| {
                level
                    .dimensions
                    .iter()
                    .map(|d| Ok((self.dim_index(&d.name)?, d.descending)))
                    .collect::<CubeResult<Vec<_>>>()
            })
            .collect::<CubeResult<Vec<_>>>()?;

        let cache_key = args
            .cache_key()
            .map(|filter_key| format!("{}||{filter_key}", spec.key()));
        if let Some(key) = &cache_key {
            let node = self.node(data)?;
            if let Some(root) = node.group_by_cache.get(key).copied() {
                if self.nodes.contains_key(root) {
                    log::trace!("group_by cache hit for {data} [{key}]");
                    return Ok(root);
                }
            }
        }

        let inclusion = DatumPredicate::from_args(args);
        let node = self.node(data)?;
        let accepted: Vec<DatumId> = node
            .datums
            .iter()
            .copied()
            .filter(|id| {
                self.datums
                    .get(*id)
                    .is_some_and(|datum| inclusion.matches(self, datum))
            })
            .collect();

        let root = self.create_linked(data)?;
        let root_node = self.node_mut(root)?;
        root_node.grouping = Some(GroupingState {
            levels,
            key: spec.key().to_string(),
            state_dependent: args.state.is_state_dependent(),
        });
        root_node.inclusion = Some(inclusion);

        self.group_datums_into(root, &accepted)?;
        if let Some(key) = cache_key {
            self.node_mut(data)?.group_by_cache.insert(key, root);
        }
        log::debug!(
            "grouped {} datums of {data} by [{}] into {root}",
            accepted.len(),
            spec.key()
        );
        Ok(root)
    }

    /// Add `datums` to grouping root `root` and place each in its branch, creating missing
    /// children in order. A datum stops descending at the first level where it holds a null atom.
    pub(crate) fn group_datums_into(&mut self, root: DataId, datums: &[DatumId]) -> CubeResult<()> {
        let levels = match &self.node(root)?.grouping {
            Some(grouping) => grouping.levels.clone(),
            None => {
                return Err(CubeError::OperationInvalid(format!(
                    "{root} is not a grouping root"
                )))
            }
        };

        for datum_id in datums {
            if !self.attach_to_derived(root, *datum_id)? {
                continue;
            }
            let Some(datum) = self.datums.get(*datum_id) else {
                continue;
            };
            let datum_atoms = datum.atoms.clone();

            let mut parent = root;
            for level in &levels {
                let level_atoms: Vec<(usize, AtomId)> = level
                    .iter()
                    .map(|(dim, _)| (*dim, datum_atoms[*dim]))
                    .collect();
                if level_atoms
                    .iter()
                    .any(|(_, atom)| self.atoms.get(*atom).is_none_or(|a| a.is_null()))
                {
                    break;
                }

                let ids: Vec<AtomId> = level_atoms.iter().map(|(_, atom)| *atom).collect();
                let key = self.group_key(&ids);
                let child = match self.node(parent)?.child_by_key.get(&key).copied() {
                    Some(child) => child,
                    None => {
                        let label = self.group_label(&ids);
                        let child = self.create_child(parent, key, label, &level_atoms)?;
                        self.insert_child_sorted(parent, child, level)?;
                        child
                    }
                };
                self.attach_to_derived(child, *datum_id)?;
                parent = child;
            }
        }
        Ok(())
    }

    fn insert_child_sorted(
        &mut self,
        parent: DataId,
        child: DataId,
        level: &[(usize, bool)],
    ) -> CubeResult<()> {
        let owner = self.owner_of(parent)?;
        let siblings = self.node(parent)?.child_nodes.clone();
        let pos = siblings.partition_point(|sibling| {
            self.compare_groups(owner, *sibling, child, level) != Ordering::Greater
        });
        self.node_mut(parent)?.child_nodes.insert(pos, child);
        Ok(())
    }

    fn compare_groups(
        &self,
        owner: DataId,
        a: DataId,
        b: DataId,
        level: &[(usize, bool)],
    ) -> Ordering {
        let (Some(a), Some(b)) = (self.nodes.get(a), self.nodes.get(b)) else {
            return Ordering::Equal;
        };
        for (dim, descending) in level {
            let ord = match (a.fixed_atoms.get(dim), b.fixed_atoms.get(dim)) {
                (Some(x), Some(y)) => self.compare_atoms(owner, *dim, *x, *y),
                _ => Ordering::Equal,
            };
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Order of two atoms of `dim`: by comparer when the dimension has one, else by their
    /// arrival rank in the owner's atom list.
    pub(crate) fn compare_atoms(&self, owner: DataId, dim: usize, a: AtomId, b: AtomId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        if let Some(cmp) = self.complex_type.dimension(dim).comparer() {
            if let (Some(a), Some(b)) = (self.atoms.get(a), self.atoms.get(b)) {
                return cmp(&a.value, &b.value);
            }
        }
        let list = self
            .nodes
            .get(owner)
            .and_then(|node| node.dimensions[dim].list());
        let rank = |atom: AtomId| list.and_then(|l| l.rank(atom)).unwrap_or(u64::MAX);
        rank(a).cmp(&rank(b))
    }

    /// Number of grouping levels below `data`: the level count at a grouping root, minus the
    /// node's depth further down; 0 outside grouping trees.
    pub fn tree_height(&self, data: DataId) -> CubeResult<usize> {
        let node = self.node(data)?;
        let root = self.node(node.root)?;
        Ok(root
            .grouping
            .as_ref()
            .map_or(0, |g| g.levels.len().saturating_sub(node.depth)))
    }

    /// Key of the grouping spec that built the tree `data` belongs to.
    pub fn grouping_key(&self, data: DataId) -> CubeResult<Option<String>> {
        let node = self.node(data)?;
        Ok(self
            .node(node.root)?
            .grouping
            .as_ref()
            .map(|g| g.key.clone()))
    }

    /// Dispose cached grouping trees of `owner`'s tree whose filters read selection or
    /// visibility.
    pub(crate) fn drop_state_dependent_groupings(&mut self, owner: DataId) -> CubeResult<()> {
        let stale: Vec<DataId> = self
            .subtree(owner)
            .into_iter()
            .filter(|id| {
                self.nodes
                    .get(*id)
                    .and_then(|node| node.grouping.as_ref())
                    .is_some_and(|g| g.state_dependent)
            })
            .collect();
        for root in stale {
            if self.nodes.contains_key(root) {
                log::trace!("dropping state-dependent grouping {root}");
                self.dispose(root)?;
            }
        }
        Ok(())
    }
}
