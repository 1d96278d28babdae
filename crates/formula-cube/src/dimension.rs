//! Per-node dimension state.
//!
//! Every Data node carries one [`Dimension`] per column of the cube's complex type. The owner's
//! dimensions intern atoms; all other dimensions hold an ordered view of the atoms that occur in
//! their node's datums, computed on first read.

use crate::atom::Atom;
use crate::cube::Cube;
use crate::error::{CubeError, CubeResult};
use crate::keys::{AtomId, DataId};
use crate::types::Comparer;
use slotmap::SlotMap;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Ordered atoms of one dimension plus a key index.
///
/// The null atom, when present, is always first.
#[derive(Clone, Debug, Default)]
pub(crate) struct AtomList {
    atoms: Vec<AtomId>,
    by_key: HashMap<Arc<str>, AtomId>,
    /// Arrival rank of each atom. The null atom ranks 0.
    ranks: HashMap<AtomId, u64>,
    next_rank: u64,
}

impl AtomList {
    pub(crate) fn atoms(&self) -> &[AtomId] {
        &self.atoms
    }

    pub(crate) fn get(&self, key: &str) -> Option<AtomId> {
        self.by_key.get(key).copied()
    }

    pub(crate) fn contains(&self, atom: &Atom) -> bool {
        self.by_key.get(&atom.key).is_some_and(|id| *id == atom.id)
    }

    pub(crate) fn len(&self) -> usize {
        self.atoms.len()
    }

    /// Rank of `id` in arrival order, which is list order for dimensions without a comparer.
    pub(crate) fn rank(&self, id: AtomId) -> Option<u64> {
        self.ranks.get(&id).copied()
    }

    fn assign_rank(&mut self, atom: &Atom) {
        let rank = if atom.is_null() {
            0
        } else {
            self.next_rank += 1;
            self.next_rank
        };
        self.ranks.insert(atom.id, rank);
    }

    /// Insert `atom` keeping the list ordered: null first, then by `comparer` when the dimension
    /// has one, otherwise in insertion order.
    pub(crate) fn insert(&mut self, atom: &Atom, atoms: &SlotMap<AtomId, Atom>, comparer: Option<&Comparer>) {
        if self.by_key.contains_key(&atom.key) {
            return;
        }
        self.by_key.insert(atom.key.clone(), atom.id);
        self.assign_rank(atom);

        if atom.is_null() {
            self.atoms.insert(0, atom.id);
            return;
        }

        let pos = match comparer {
            Some(cmp) => {
                let first_non_null = usize::from(
                    self.atoms
                        .first()
                        .and_then(|id| atoms.get(*id))
                        .is_some_and(Atom::is_null),
                );
                let tail = &self.atoms[first_non_null..];
                first_non_null
                    + tail.partition_point(|id| {
                        atoms
                            .get(*id)
                            .map(|existing| cmp(&existing.value, &atom.value) != Ordering::Greater)
                            .unwrap_or(true)
                    })
            }
            None => self.atoms.len(),
        };
        self.atoms.insert(pos, atom.id);
    }

    pub(crate) fn remove_where(&mut self, mut remove: impl FnMut(AtomId) -> bool) -> Vec<AtomId> {
        let mut removed = Vec::new();
        self.atoms.retain(|id| {
            if remove(*id) {
                removed.push(*id);
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            let gone: HashSet<AtomId> = removed.iter().copied().collect();
            self.by_key.retain(|_, id| !gone.contains(id));
            self.ranks.retain(|id, _| !gone.contains(id));
        }
        removed
    }

    pub(crate) fn from_ordered(ordered: Vec<AtomId>, atoms: &SlotMap<AtomId, Atom>) -> Self {
        let mut list = Self::default();
        for atom in ordered.iter().filter_map(|id| atoms.get(*id)) {
            list.by_key.insert(atom.key.clone(), atom.id);
            list.assign_rank(atom);
        }
        list.atoms = ordered;
        list
    }
}

#[derive(Clone, Debug)]
pub(crate) enum AtomView {
    Uninitialized,
    Initialized(AtomList),
}

#[derive(Clone, Debug)]
pub(crate) struct Dimension {
    pub(crate) view: AtomView,
    /// Real null atom. Owner dimensions only.
    pub(crate) null_atom: Option<AtomId>,
    /// Placeholder for datums that never supplied this dimension. Owner dimensions only.
    pub(crate) virtual_null: Option<AtomId>,
    visible_atoms: Option<Vec<AtomId>>,
    invisible_atoms: Option<Vec<AtomId>>,
}

impl Dimension {
    pub(crate) fn owner(virtual_null: AtomId) -> Self {
        Self {
            view: AtomView::Initialized(AtomList::default()),
            null_atom: None,
            virtual_null: Some(virtual_null),
            visible_atoms: None,
            invisible_atoms: None,
        }
    }

    pub(crate) fn derived() -> Self {
        Self {
            view: AtomView::Uninitialized,
            null_atom: None,
            virtual_null: None,
            visible_atoms: None,
            invisible_atoms: None,
        }
    }

    pub(crate) fn list(&self) -> Option<&AtomList> {
        match &self.view {
            AtomView::Initialized(list) => Some(list),
            AtomView::Uninitialized => None,
        }
    }

    pub(crate) fn list_mut(&mut self) -> Option<&mut AtomList> {
        match &mut self.view {
            AtomView::Initialized(list) => Some(list),
            AtomView::Uninitialized => None,
        }
    }

    /// The atom datums fall back to: the real null once interned, else the placeholder.
    pub(crate) fn default_atom(&self) -> Option<AtomId> {
        self.null_atom.or(self.virtual_null)
    }

    pub(crate) fn clear_caches(&mut self) {
        self.visible_atoms = None;
        self.invisible_atoms = None;
    }

    /// Drop the derived view so it is recomputed from the node's datums on next read.
    pub(crate) fn reset_view(&mut self) {
        if self.virtual_null.is_none() {
            self.view = AtomView::Uninitialized;
        }
        self.clear_caches();
    }

    fn cached_atoms(&self, visible: bool) -> Option<&Vec<AtomId>> {
        if visible {
            self.visible_atoms.as_ref()
        } else {
            self.invisible_atoms.as_ref()
        }
    }

    fn store_cached_atoms(&mut self, visible: bool, atoms: Vec<AtomId>) {
        if visible {
            self.visible_atoms = Some(atoms);
        } else {
            self.invisible_atoms = Some(atoms);
        }
    }
}

impl Cube {
    /// Materialize the atom view of `data`'s dimension `dim`. Idempotent.
    pub(crate) fn ensure_view(&mut self, data: DataId, dim: usize) -> CubeResult<()> {
        let node = self.node(data)?;
        if node.dimensions[dim].list().is_some() {
            return Ok(());
        }

        let owner = node.owner;
        let mut present: HashSet<AtomId> = HashSet::new();
        let mut ordered = Vec::new();
        for datum_id in &node.datums {
            let Some(datum) = self.datums.get(*datum_id) else {
                continue;
            };
            let atom_id = datum.atoms[dim];
            let Some(atom) = self.atoms.get(atom_id) else {
                continue;
            };
            if atom.is_virtual_null {
                continue;
            }
            if present.insert(atom_id) {
                ordered.push(atom_id);
            }
        }

        let owner_list = self.node(owner)?.dimensions[dim].list();
        match self.complex_type.dimension(dim).comparer() {
            Some(cmp) => {
                let atoms = &self.atoms;
                ordered.sort_by(|a, b| match (atoms.get(*a), atoms.get(*b)) {
                    (Some(a), Some(b)) => match (a.is_null(), b.is_null()) {
                        (true, true) => Ordering::Equal,
                        (true, false) => Ordering::Less,
                        (false, true) => Ordering::Greater,
                        (false, false) => cmp(&a.value, &b.value),
                    },
                    _ => Ordering::Equal,
                });
            }
            None => {
                ordered.sort_by_key(|id| {
                    owner_list
                        .and_then(|list| list.rank(*id))
                        .unwrap_or(u64::MAX)
                });
            }
        }

        let list = AtomList::from_ordered(ordered, &self.atoms);
        let node = self.node_mut(data)?;
        node.dimensions[dim].view = AtomView::Initialized(list);
        node.dimensions[dim].clear_caches();
        Ok(())
    }

    /// Register `atom` in the view of `data`'s dimension, when that view is materialized.
    pub(crate) fn register_in_view(&mut self, data: DataId, atom_id: AtomId) -> CubeResult<()> {
        let Some(atom) = self.atoms.get(atom_id) else {
            return Ok(());
        };
        if atom.is_virtual_null {
            return Ok(());
        }
        let dim = atom.dimension;
        let comparer = self.complex_type.dimension(dim).comparer().cloned();
        let node = self
            .nodes
            .get_mut(data)
            .ok_or(CubeError::DataDisposed(data))?;
        let dimension = &mut node.dimensions[dim];
        if let Some(list) = dimension.list_mut() {
            if !list.contains(atom) {
                list.insert(atom, &self.atoms, comparer.as_ref());
                dimension.clear_caches();
            }
        }
        Ok(())
    }

    /// Atoms of `dim` in `data`'s view: all of them, or only those with at least one datum of
    /// the requested visibility.
    pub(crate) fn view_atoms(
        &mut self,
        data: DataId,
        dim: usize,
        visible: Option<bool>,
    ) -> CubeResult<Vec<AtomId>> {
        self.ensure_view(data, dim)?;
        let node = self.node(data)?;
        let dimension = &node.dimensions[dim];
        let all = dimension.list().map(|l| l.atoms().to_vec()).unwrap_or_default();
        let Some(visible) = visible else {
            return Ok(all);
        };
        if let Some(cached) = dimension.cached_atoms(visible) {
            log::trace!("visible atom cache hit for {data} dim {dim}");
            return Ok(cached.clone());
        }

        let with_state: HashSet<AtomId> = node
            .datums
            .iter()
            .filter_map(|id| self.datums.get(*id))
            .filter(|datum| datum.is_visible == visible)
            .map(|datum| datum.atoms[dim])
            .collect();
        let filtered: Vec<AtomId> = all.into_iter().filter(|id| with_state.contains(id)).collect();
        self.node_mut(data)?.dimensions[dim].store_cached_atoms(visible, filtered.clone());
        Ok(filtered)
    }
}
