//! Atom collection and virtual-data cleanup.

use crate::cube::Cube;
use crate::error::CubeResult;
use crate::keys::{AtomId, DataId, DatumId};
use std::collections::HashSet;

impl Cube {
    /// Mark-and-sweep over the atoms of owner `data`: every atom not referenced by a retained
    /// datum is removed, except the virtual-null placeholders. Returns the number of atoms removed.
    ///
    /// # Panics
    ///
    /// When `data` is not an owner node.
    pub fn collect_atoms(&mut self, data: DataId) -> CubeResult<usize> {
        let node = self.node(data)?;
        assert!(
            node.is_owner(),
            "atoms are collected on owner data nodes only; {data} is derived from {}",
            node.owner
        );

        let mut visited: HashSet<AtomId> = HashSet::new();
        for id in &node.datums {
            if let Some(datum) = self.datums.get(*id) {
                visited.extend(datum.atoms.iter().copied());
            }
        }

        let node = self.node_mut(data)?;
        let mut swept: Vec<AtomId> = Vec::new();
        for dimension in &mut node.dimensions {
            let null = dimension.null_atom;
            let Some(list) = dimension.list_mut() else {
                continue;
            };
            let removed = list.remove_where(|id| !visited.contains(&id));
            if removed.is_empty() {
                continue;
            }
            if null.is_some_and(|null| removed.contains(&null)) {
                dimension.null_atom = None;
            }
            dimension.clear_caches();
            swept.extend(removed);
        }
        if swept.is_empty() {
            return Ok(0);
        }
        node.invalidate();

        let gone: HashSet<AtomId> = swept.iter().copied().collect();
        for id in self.subtree(data).into_iter().skip(1) {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            for dimension in &mut node.dimensions {
                if let Some(list) = dimension.list_mut() {
                    if !list.remove_where(|atom| gone.contains(&atom)).is_empty() {
                        dimension.clear_caches();
                    }
                }
            }
        }
        for id in &swept {
            self.atoms.remove(*id);
        }
        log::debug!("collected {} unreferenced atoms of {data}", swept.len());
        Ok(swept.len())
    }

    /// Remove virtual datums and virtual atoms from `data` and every node derived from it.
    /// Derived nodes emptied by the pass dispose themselves. On an owner the datums and atoms
    /// are released as well. Returns the number of datums removed from `data`.
    pub fn clear_virtuals(&mut self, data: DataId) -> CubeResult<usize> {
        let node = self.node(data)?;
        let is_owner = node.is_owner();
        let virtual_datums: HashSet<DatumId> = node
            .datums
            .iter()
            .copied()
            .filter(|id| {
                self.datums.get(*id).is_some_and(|datum| {
                    datum.is_virtual
                        || datum
                            .atoms
                            .iter()
                            .any(|atom| self.atoms.get(*atom).is_some_and(|a| a.is_virtual))
                })
            })
            .collect();

        let atoms = &self.atoms;
        let mut emptied = Vec::new();
        for id in self.subtree(data) {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            let detached = node.detach(&virtual_datums);
            let mut changed = detached;
            for dimension in &mut node.dimensions {
                if let Some(list) = dimension.list_mut() {
                    let removed =
                        list.remove_where(|atom| atoms.get(atom).is_some_and(|a| a.is_virtual));
                    changed |= !removed.is_empty();
                }
            }
            if changed {
                node.invalidate();
            }
            if detached && !node.is_owner() && node.datums.is_empty() {
                emptied.push(id);
            }
        }

        for id in emptied {
            if self.nodes.contains_key(id) {
                self.dispose(id)?;
            }
        }

        if is_owner {
            for id in &virtual_datums {
                self.datums.remove(*id);
            }
            let virtual_atoms: Vec<AtomId> = self
                .atoms
                .iter()
                .filter(|(_, atom)| atom.owner == data && atom.is_virtual)
                .map(|(id, _)| id)
                .collect();
            for id in virtual_atoms {
                self.atoms.remove(id);
            }
        }

        log::debug!(
            "cleared {} virtual datums from {data}",
            virtual_datums.len()
        );
        Ok(virtual_datums.len())
    }
}
