use crate::cube::Cube;
use crate::datum::{Datum, DatumView, Row, SourceValue};
use crate::dimension::Dimension;
use crate::error::{CubeError, CubeResult};
use crate::grouping::GroupingState;
use crate::keys::{AtomId, DataId, DatumId};
use crate::query::{DatumPredicate, WherePredicate};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Eviction policy run after every load: receives the retained datums, returns those to drop.
pub type SlidingWindow = Arc<dyn Fn(&Cube, &[DatumId]) -> Vec<DatumId> + Send + Sync>;

/// Per-load predicates, evaluated on every constructed datum before it is accepted.
#[derive(Clone, Default)]
pub struct LoadArgs {
    /// Marks matching datums as null. Null datums are never selected.
    pub is_null: Option<WherePredicate>,
    /// Rejects datums for which it returns `false`.
    pub where_: Option<WherePredicate>,
}

impl LoadArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_is_null(
        mut self,
        is_null: impl Fn(&DatumView<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_null = Some(Arc::new(is_null));
        self
    }

    pub fn with_where(
        mut self,
        where_: impl Fn(&DatumView<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.where_ = Some(Arc::new(where_));
        self
    }
}

impl fmt::Debug for LoadArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadArgs")
            .field("is_null", &self.is_null.is_some())
            .field("where_", &self.where_.is_some())
            .finish()
    }
}

/// A node of a Data tree.
pub struct DataNode {
    pub(crate) id: DataId,
    pub(crate) owner: DataId,
    pub(crate) root: DataId,
    pub(crate) parent: Option<DataId>,
    pub(crate) link_parent: Option<DataId>,
    pub(crate) depth: usize,
    pub(crate) key: Arc<str>,
    pub(crate) label: String,
    /// Atoms every datum of this node must carry (inherited from the parent plus this level's).
    pub(crate) fixed_atoms: HashMap<usize, AtomId>,
    pub(crate) child_nodes: Vec<DataId>,
    pub(crate) child_by_key: HashMap<Arc<str>, DataId>,
    pub(crate) link_children: Vec<DataId>,
    pub(crate) datums: Vec<DatumId>,
    pub(crate) datum_by_key: HashMap<Arc<str>, DatumId>,
    pub(crate) datum_ids: HashSet<DatumId>,
    /// Selected, not-null datums.
    pub(crate) selected: HashSet<DatumId>,
    /// Visible, not-null datums.
    pub(crate) visible: HashSet<DatumId>,
    pub(crate) dimensions: Vec<Dimension>,
    pub(crate) grouping: Option<GroupingState>,
    pub(crate) group_by_cache: HashMap<String, DataId>,
    pub(crate) aggregate_cache: HashMap<String, f64>,
    /// Linked nodes only: decides which datums offered by later additive loads are absorbed.
    pub(crate) inclusion: Option<DatumPredicate>,
    pub(crate) sliding_window: Option<SlidingWindow>,
}

impl fmt::Debug for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataNode")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("parent", &self.parent)
            .field("link_parent", &self.link_parent)
            .field("key", &self.key)
            .field("datums", &self.datums.len())
            .field("child_nodes", &self.child_nodes)
            .field("link_children", &self.link_children)
            .finish()
    }
}

impl DataNode {
    pub(crate) fn new(
        id: DataId,
        owner: DataId,
        parent: Option<DataId>,
        link_parent: Option<DataId>,
        depth: usize,
        dimensions: Vec<Dimension>,
    ) -> Self {
        Self {
            id,
            owner,
            root: id,
            parent,
            link_parent,
            depth,
            key: Arc::from(""),
            label: String::new(),
            fixed_atoms: HashMap::new(),
            child_nodes: Vec::new(),
            child_by_key: HashMap::new(),
            link_children: Vec::new(),
            datums: Vec::new(),
            datum_by_key: HashMap::new(),
            datum_ids: HashSet::new(),
            selected: HashSet::new(),
            visible: HashSet::new(),
            dimensions,
            grouping: None,
            group_by_cache: HashMap::new(),
            aggregate_cache: HashMap::new(),
            inclusion: None,
            sliding_window: None,
        }
    }

    pub fn id(&self) -> DataId {
        self.id
    }

    pub fn owner(&self) -> DataId {
        self.owner
    }

    /// Topmost node of the `parent` chain.
    pub fn root(&self) -> DataId {
        self.root
    }

    pub fn parent(&self) -> Option<DataId> {
        self.parent
    }

    pub fn link_parent(&self) -> Option<DataId> {
        self.link_parent
    }

    pub fn is_owner(&self) -> bool {
        self.owner == self.id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Group key relative to the parent (joined atom keys of this node's level).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn datums(&self) -> &[DatumId] {
        &self.datums
    }

    pub fn datum_count(&self) -> usize {
        self.datums.len()
    }

    pub fn contains(&self, datum: DatumId) -> bool {
        self.datum_ids.contains(&datum)
    }

    pub fn datum_by_key(&self, key: &str) -> Option<DatumId> {
        self.datum_by_key.get(key).copied()
    }

    pub fn child_nodes(&self) -> &[DataId] {
        &self.child_nodes
    }

    pub fn child_count(&self) -> usize {
        self.child_nodes.len()
    }

    pub fn child_by_key(&self, key: &str) -> Option<DataId> {
        self.child_by_key.get(key).copied()
    }

    pub fn link_children(&self) -> &[DataId] {
        &self.link_children
    }

    /// Atom fixed for `dimension` at this node, if the node is a grouping child on it.
    pub fn fixed_atom(&self, dimension: usize) -> Option<AtomId> {
        self.fixed_atoms.get(&dimension).copied()
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }

    pub fn is_grouping_root(&self) -> bool {
        self.grouping.is_some()
    }

    pub fn has_sliding_window(&self) -> bool {
        self.sliding_window.is_some()
    }

    pub(crate) fn has_dependents(&self) -> bool {
        !self.child_nodes.is_empty() || !self.link_children.is_empty()
    }

    /// Clear every derived cache of this node. Called from all mutation paths.
    pub(crate) fn invalidate(&mut self) {
        self.aggregate_cache.clear();
        for dimension in &mut self.dimensions {
            dimension.clear_caches();
        }
    }

    pub(crate) fn attach(&mut self, datum: &Datum) -> bool {
        if self.datum_ids.contains(&datum.id) || self.datum_by_key.contains_key(&datum.key) {
            return false;
        }
        self.datums.push(datum.id);
        self.datum_by_key.insert(datum.key.clone(), datum.id);
        self.datum_ids.insert(datum.id);
        if !datum.is_null {
            if datum.is_selected {
                self.selected.insert(datum.id);
            }
            if datum.is_visible {
                self.visible.insert(datum.id);
            }
        }
        true
    }

    pub(crate) fn detach(&mut self, removed: &HashSet<DatumId>) -> bool {
        let before = self.datums.len();
        self.datums.retain(|id| !removed.contains(id));
        if self.datums.len() == before {
            return false;
        }
        self.datum_by_key.retain(|_, id| !removed.contains(id));
        for id in removed {
            self.datum_ids.remove(id);
            self.selected.remove(id);
            self.visible.remove(id);
        }
        true
    }

    fn sync_state(&mut self, datum: &Datum) {
        if !self.datum_ids.contains(&datum.id) {
            return;
        }
        if datum.is_selected && !datum.is_null {
            self.selected.insert(datum.id);
        } else {
            self.selected.remove(&datum.id);
        }
        if datum.is_visible && !datum.is_null {
            self.visible.insert(datum.id);
        } else {
            self.visible.remove(&datum.id);
        }
        self.invalidate();
    }
}

impl Cube {
    /// Replace the datums of owner `data` with `rows`.
    pub fn load(
        &mut self,
        data: DataId,
        rows: impl IntoIterator<Item = Row>,
        args: &LoadArgs,
    ) -> CubeResult<Vec<DatumId>> {
        self.set_datums(data, Some(rows.into_iter().collect()), false, args)
    }

    /// Append `rows` to owner `data`, offering the new datums to its linked children.
    pub fn add(
        &mut self,
        data: DataId,
        rows: impl IntoIterator<Item = Row>,
        args: &LoadArgs,
    ) -> CubeResult<Vec<DatumId>> {
        self.set_datums(data, Some(rows.into_iter().collect()), true, args)
    }

    /// Shared implementation of [`Cube::load`] and [`Cube::add`]. Returns the datums the call
    /// added and retained.
    ///
    /// Rows are validated up front; a rejected call leaves `data` untouched.
    /// A replace disposes every dependent node, reuses datums of the previous load that reappear
    /// with the same key, and finishes with an atom collection. An additive call keeps the
    /// dependents, which absorb the new datums through their own inclusion filters; collecting
    /// atoms is then up to the caller.
    pub fn set_datums(
        &mut self,
        data: DataId,
        rows: Option<Vec<Row>>,
        additive: bool,
        args: &LoadArgs,
    ) -> CubeResult<Vec<DatumId>> {
        let rows = rows.ok_or_else(|| CubeError::ArgumentRequired("rows".to_string()))?;
        let node = self.node(data)?;
        if !node.is_owner() {
            return Err(CubeError::OperationInvalid(format!(
                "datums of {data} are derived from {}; load into the owner instead",
                node.owner
            )));
        }
        if additive && node.sliding_window.is_some() && node.has_dependents() {
            return Err(CubeError::OperationInvalid(format!(
                "{data} has a sliding window; dispose its dependents before adding datums"
            )));
        }

        self.validate_rows(data, &rows)?;

        let mut previous = HashMap::new();
        if !additive {
            self.dispose_dependents(data)?;
            let node = self.node_mut(data)?;
            previous = std::mem::take(&mut node.datum_by_key);
            node.datums.clear();
            node.datum_ids.clear();
            node.selected.clear();
            node.visible.clear();
        }
        self.node_mut(data)?.invalidate();

        let mut staged: Vec<DatumId> = Vec::new();
        let mut staged_keys: HashSet<Arc<str>> = HashSet::new();
        for row in &rows {
            let (atoms, key) = self.resolve_row(data, row)?;
            if staged_keys.contains(&key)
                || (additive && self.node(data)?.datum_by_key.contains_key(&key))
            {
                log::trace!("skipping duplicate datum key {key:?} in {data}");
                continue;
            }

            let datum_id = match previous.remove(&key) {
                Some(existing) => {
                    if let Some(datum) = self.datums.get_mut(existing) {
                        datum.atoms = atoms;
                        datum.is_virtual = row.is_virtual();
                    }
                    existing
                }
                None => self.datums.insert_with_key(|id| Datum {
                    id,
                    owner: data,
                    key: key.clone(),
                    atoms,
                    is_null: false,
                    is_virtual: row.is_virtual(),
                    is_selected: false,
                    is_visible: true,
                }),
            };

            if !self.accept_datum(datum_id, args) {
                self.datums.remove(datum_id);
                continue;
            }
            staged_keys.insert(key);
            staged.push(datum_id);
        }
        for (_, stale) in previous {
            self.datums.remove(stale);
        }

        let node = self
            .nodes
            .get_mut(data)
            .ok_or(CubeError::DataDisposed(data))?;
        for id in &staged {
            if let Some(datum) = self.datums.get(*id) {
                node.attach(datum);
            }
        }

        let evicted = self.apply_sliding_window(data)?;
        let added: Vec<DatumId> = staged
            .into_iter()
            .filter(|id| !evicted.contains(id))
            .collect();

        if additive {
            self.offer_to_link_children(data, &added)?;
        } else {
            self.collect_atoms(data)?;
        }

        log::debug!(
            "{} {} datums into {data} ({} rows, {} evicted)",
            if additive { "added" } else { "loaded" },
            added.len(),
            rows.len(),
            evicted.len()
        );
        Ok(added)
    }

    /// Check every row before a load touches `data`: each dimension must exist and each atom
    /// handle must be interned in the matching dimension of `data`.
    fn validate_rows(&self, data: DataId, rows: &[Row]) -> CubeResult<()> {
        for row in rows {
            for (name, value) in row.values() {
                let dim = self.complex_type.dimension_index(name).map_err(|_| {
                    CubeError::invalid_argument("rows", format!("unknown dimension {name}"))
                })?;
                if let SourceValue::Atom(atom) = value {
                    self.check_atom_at(data, dim, *atom)?;
                }
            }
        }
        Ok(())
    }

    /// Intern every value of `row` into the owner's dimensions and compute the datum key.
    fn resolve_row(
        &mut self,
        data: DataId,
        row: &Row,
    ) -> CubeResult<(SmallVec<[AtomId; 8]>, Arc<str>)> {
        let node = self.node(data)?;
        let mut atoms: SmallVec<[AtomId; 8]> = SmallVec::with_capacity(node.dimensions.len());
        for dimension in &node.dimensions {
            let default = dimension.default_atom().ok_or_else(|| {
                CubeError::OperationInvalid(format!("{data} has no null atom to default to"))
            })?;
            atoms.push(default);
        }

        for (name, value) in row.values() {
            let dim = self.complex_type.dimension_index(name).map_err(|_| {
                CubeError::invalid_argument("rows", format!("unknown dimension {name}"))
            })?;
            atoms[dim] = self.intern_at(data, dim, value.clone(), row.is_virtual())?;
        }

        let key = self.group_key(&atoms);
        Ok((atoms, key))
    }

    fn accept_datum(&mut self, datum_id: DatumId, args: &LoadArgs) -> bool {
        let Some(datum) = self.datums.get(datum_id) else {
            return false;
        };
        let view = DatumView::new(self, datum);
        if let Some(where_) = &args.where_ {
            if !where_(&view) {
                return false;
            }
        }
        let is_null = args.is_null.as_ref().is_some_and(|f| f(&view));
        if let Some(datum) = self.datums.get_mut(datum_id) {
            datum.is_null = is_null;
            if is_null {
                datum.is_selected = false;
            }
        }
        true
    }

    /// Install (or clear) the eviction policy run after every load of owner `data`.
    pub fn set_sliding_window(
        &mut self,
        data: DataId,
        window: Option<SlidingWindow>,
    ) -> CubeResult<()> {
        let node = self.node_mut(data)?;
        if !node.is_owner() {
            return Err(CubeError::OperationInvalid(format!(
                "sliding windows apply to owner data nodes; {data} is derived"
            )));
        }
        node.sliding_window = window;
        Ok(())
    }

    fn apply_sliding_window(&mut self, data: DataId) -> CubeResult<HashSet<DatumId>> {
        let node = self.node(data)?;
        let Some(window) = node.sliding_window.clone() else {
            return Ok(HashSet::new());
        };
        let current = node.datums.clone();
        let evicted: HashSet<DatumId> = window(self, &current)
            .into_iter()
            .filter(|id| current.contains(id))
            .collect();
        if !evicted.is_empty() {
            self.remove_datums(data, evicted.iter().copied())?;
        }
        Ok(evicted)
    }

    /// Remove datums from owner `data` and from every node derived from it. Grouping children
    /// left without datums are disposed. Atoms are kept until the next collection.
    pub fn remove_datums(
        &mut self,
        data: DataId,
        datums: impl IntoIterator<Item = DatumId>,
    ) -> CubeResult<usize> {
        let node = self.node(data)?;
        if !node.is_owner() {
            return Err(CubeError::OperationInvalid(format!(
                "datums of {data} are derived; remove them from the owner"
            )));
        }
        let removed: HashSet<DatumId> = datums
            .into_iter()
            .filter(|id| node.datum_ids.contains(id))
            .collect();
        if removed.is_empty() {
            return Ok(0);
        }

        let mut emptied = Vec::new();
        for id in self.subtree(data) {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            if node.detach(&removed) {
                node.invalidate();
                for dimension in &mut node.dimensions {
                    dimension.reset_view();
                }
                if node.datums.is_empty() && node.parent.is_some() {
                    emptied.push(id);
                }
            }
        }
        for id in emptied {
            if self.nodes.contains_key(id) {
                self.dispose(id)?;
            }
        }
        for id in &removed {
            self.datums.remove(*id);
        }
        log::debug!("removed {} datums from {data}", removed.len());
        Ok(removed.len())
    }

    /// Attach an owner datum to a derived node, registering its atoms in the node's views.
    pub(crate) fn attach_to_derived(&mut self, data: DataId, datum_id: DatumId) -> CubeResult<bool> {
        let datum = self
            .datums
            .get(datum_id)
            .ok_or_else(|| CubeError::invalid_argument("datum", format!("{datum_id} is gone")))?;
        let node = self.nodes.get_mut(data).ok_or(CubeError::DataDisposed(data))?;
        for (dim, fixed) in &node.fixed_atoms {
            if datum.atoms[*dim] != *fixed {
                return Err(CubeError::OperationInvalid(format!(
                    "{datum_id} does not carry the atom fixed for dimension {dim} of {data}"
                )));
            }
        }
        if !node.attach(datum) {
            return Ok(false);
        }
        node.invalidate();
        let atoms = datum.atoms.clone();
        for atom in atoms {
            self.register_in_view(data, atom)?;
        }
        Ok(true)
    }

    /// Offer datums newly added to `data` to each of its linked children, which keep the ones
    /// their inclusion filter accepts and pass them on to their own dependents.
    pub(crate) fn offer_to_link_children(
        &mut self,
        data: DataId,
        added: &[DatumId],
    ) -> CubeResult<()> {
        if added.is_empty() {
            return Ok(());
        }
        let children = self.node(data)?.link_children.clone();
        for child in children {
            let Some(node) = self.nodes.get(child) else {
                continue;
            };
            let accepted: Vec<DatumId> = added
                .iter()
                .copied()
                .filter(|id| match (self.datums.get(*id), &node.inclusion) {
                    (Some(datum), Some(inclusion)) => inclusion.matches(self, datum),
                    (Some(_), None) => true,
                    (None, _) => false,
                })
                .collect();
            if accepted.is_empty() {
                continue;
            }

            if node.grouping.is_some() {
                self.group_datums_into(child, &accepted)?;
                for descendant in self.subtree(child) {
                    if descendant == child {
                        continue;
                    }
                    let Some(desc) = self.nodes.get(descendant) else {
                        continue;
                    };
                    if desc.link_children.is_empty() {
                        continue;
                    }
                    let held: Vec<DatumId> = accepted
                        .iter()
                        .copied()
                        .filter(|id| desc.datum_ids.contains(id))
                        .collect();
                    self.offer_to_link_children(descendant, &held)?;
                }
            } else {
                for id in &accepted {
                    self.attach_to_derived(child, *id)?;
                }
            }
            self.offer_to_link_children(child, &accepted)?;
        }
        Ok(())
    }

    pub fn set_selected(&mut self, datum: DatumId, selected: bool) -> CubeResult<bool> {
        self.set_datum_state(datum, |d| {
            if selected && d.is_null {
                return false;
            }
            let changed = d.is_selected != selected;
            d.is_selected = selected;
            changed
        })
    }

    pub fn set_visible(&mut self, datum: DatumId, visible: bool) -> CubeResult<bool> {
        self.set_datum_state(datum, |d| {
            let changed = d.is_visible != visible;
            d.is_visible = visible;
            changed
        })
    }

    /// Deselect every selected datum of `data`. Returns whether anything changed.
    pub fn clear_selected(&mut self, data: DataId) -> CubeResult<bool> {
        let selected: Vec<DatumId> = self.node(data)?.selected.iter().copied().collect();
        let mut changed = false;
        for id in selected {
            changed |= self.set_selected(id, false)?;
        }
        Ok(changed)
    }

    /// Selected datums of `data`, in datum order.
    pub fn selected_datums(&self, data: DataId) -> CubeResult<Vec<DatumId>> {
        let node = self.node(data)?;
        Ok(node
            .datums
            .iter()
            .copied()
            .filter(|id| node.selected.contains(id))
            .collect())
    }

    fn set_datum_state(
        &mut self,
        datum_id: DatumId,
        update: impl FnOnce(&mut Datum) -> bool,
    ) -> CubeResult<bool> {
        let datum = self
            .datums
            .get_mut(datum_id)
            .ok_or_else(|| CubeError::invalid_argument("datum", format!("{datum_id} is gone")))?;
        if !update(datum) {
            return Ok(false);
        }
        let owner = datum.owner;

        let Some(datum) = self.datums.get(datum_id) else {
            return Ok(false);
        };
        for id in self.subtree(owner) {
            if let Some(node) = self.nodes.get_mut(id) {
                node.sync_state(datum);
            }
        }
        self.drop_state_dependent_groupings(owner)?;
        Ok(true)
    }
}
