//! Value interning and the dimension read API.
//!
//! Only owner dimensions create atoms. Interning through any other node walks its `parent` /
//! `link_parent` chain to the owner, creates (or finds) the atom there, and then registers it in
//! every materialized view along the way.

use crate::atom::Atom;
use crate::cube::Cube;
use crate::datum::SourceValue;
use crate::dimension::AtomView;
use crate::error::{CubeError, CubeResult};
use crate::keys::{AtomId, DataId};
use crate::value::Value;
use std::sync::Arc;

impl Cube {
    /// Resolve `source` to the canonical atom of `dimension` in `data`'s tree, creating it in the
    /// owner when needed.
    pub fn intern(
        &mut self,
        data: DataId,
        dimension: &str,
        source: impl Into<SourceValue>,
        is_virtual: bool,
    ) -> CubeResult<AtomId> {
        let dim = self.dim_index(dimension)?;
        self.intern_at(data, dim, source.into(), is_virtual)
    }

    pub(crate) fn intern_at(
        &mut self,
        data: DataId,
        dim: usize,
        source: SourceValue,
        is_virtual: bool,
    ) -> CubeResult<AtomId> {
        let raw = match source {
            SourceValue::Atom(atom) => return self.intern_atom_at(data, dim, atom),
            SourceValue::Value(raw) => raw,
        };

        let dim_type = self.complex_type.dimension(dim);
        let value = dim_type.typed_value(&raw);
        if value.is_null() {
            let null = self.ensure_null_atom(data, dim)?;
            self.register_along_chain(data, null)?;
            return Ok(null);
        }

        let key: Arc<str> = Arc::from(dim_type.key_of(&value));
        let owner = self.owner_of(data)?;
        let existing = self.node(owner)?.dimensions[dim]
            .list()
            .and_then(|list| list.get(&key));

        let atom_id = match existing {
            Some(id) => {
                if !is_virtual {
                    if let Some(atom) = self.atoms.get_mut(id) {
                        atom.is_virtual = false;
                    }
                }
                id
            }
            None => {
                let label: Arc<str> = Arc::from(dim_type.format(&value));
                self.atoms.insert_with_key(|id| Atom {
                    id,
                    owner,
                    dimension: dim,
                    value,
                    raw,
                    label,
                    key,
                    is_virtual,
                    is_virtual_null: false,
                })
            }
        };
        self.register_along_chain(data, atom_id)?;
        Ok(atom_id)
    }

    /// Register an already interned atom in `data`'s dimension and every dimension on the chain
    /// to the owner. A virtual-null resolves to the real null once one exists.
    pub fn intern_atom(&mut self, data: DataId, dimension: &str, atom: AtomId) -> CubeResult<AtomId> {
        let dim = self.dim_index(dimension)?;
        self.intern_atom_at(data, dim, atom)
    }

    pub(crate) fn intern_atom_at(
        &mut self,
        data: DataId,
        dim: usize,
        atom_id: AtomId,
    ) -> CubeResult<AtomId> {
        let is_virtual_null = self.check_atom_at(data, dim, atom_id)?.is_virtual_null;
        let owner = self.owner_of(data)?;
        let atom_id = if is_virtual_null {
            self.node(owner)?.dimensions[dim]
                .default_atom()
                .unwrap_or(atom_id)
        } else {
            atom_id
        };
        self.register_along_chain(data, atom_id)?;
        Ok(atom_id)
    }

    /// The atom behind `atom_id`, when it is live and interned in dimension `dim` of `data`'s
    /// owner.
    pub(crate) fn check_atom_at(&self, data: DataId, dim: usize, atom_id: AtomId) -> CubeResult<&Atom> {
        let owner = self.owner_of(data)?;
        let atom = self.atoms.get(atom_id).ok_or_else(|| {
            CubeError::OperationInvalid(format!("{atom_id} is not a live atom"))
        })?;
        if atom.owner != owner {
            return Err(CubeError::OperationInvalid(format!(
                "{atom_id} belongs to {}, not to the tree of {data}",
                atom.owner
            )));
        }
        if atom.dimension != dim {
            return Err(CubeError::OperationInvalid(format!(
                "{atom_id} belongs to dimension {}, not {}",
                self.complex_type.dimension(atom.dimension).name(),
                self.complex_type.dimension(dim).name()
            )));
        }
        Ok(atom)
    }

    /// Nodes from `data` up to its owner, following `parent` and then `link_parent`.
    pub(crate) fn source_chain(&self, data: DataId) -> CubeResult<Vec<DataId>> {
        let mut chain = Vec::new();
        let mut current = Some(data);
        while let Some(id) = current {
            let node = self.node(id)?;
            chain.push(id);
            if node.is_owner() {
                break;
            }
            current = node.parent.or(node.link_parent);
        }
        Ok(chain)
    }

    fn register_along_chain(&mut self, data: DataId, atom_id: AtomId) -> CubeResult<()> {
        let chain = self.source_chain(data)?;
        if let Some(atom) = self.atoms.get(atom_id) {
            for id in &chain {
                let node = self.node(*id)?;
                if let Some(fixed) = node.fixed_atoms.get(&atom.dimension) {
                    if *fixed != atom_id {
                        return Err(CubeError::OperationInvalid(format!(
                            "{id} fixes dimension {} to another atom",
                            self.complex_type.dimension(atom.dimension).name()
                        )));
                    }
                }
            }
        }
        for id in chain.into_iter().rev() {
            self.register_in_view(id, atom_id)?;
        }
        Ok(())
    }

    /// The owner's real null atom for `dim`, created on first use. Creating it re-points every
    /// datum that held the virtual-null placeholder.
    fn ensure_null_atom(&mut self, data: DataId, dim: usize) -> CubeResult<AtomId> {
        let owner = self.owner_of(data)?;
        let node = self.node(owner)?;
        if let Some(null) = node.dimensions[dim].null_atom {
            return Ok(null);
        }
        let virtual_null = node.dimensions[dim].virtual_null;

        let label = self.options.null_label.clone();
        let null = self.atoms.insert_with_key(|id| Atom {
            id,
            owner,
            dimension: dim,
            value: Value::Null,
            raw: Value::Null,
            label,
            key: Arc::from(""),
            is_virtual: false,
            is_virtual_null: false,
        });
        self.node_mut(owner)?.dimensions[dim].null_atom = Some(null);

        if let Some(placeholder) = virtual_null {
            let mut promoted = 0usize;
            for (_, datum) in self.datums.iter_mut() {
                if datum.owner == owner && datum.atoms[dim] == placeholder {
                    datum.atoms[dim] = null;
                    promoted += 1;
                }
            }
            if promoted > 0 {
                log::trace!("promoted {promoted} datums of {owner} to the real null of dim {dim}");
                for id in self.subtree(owner) {
                    if let Some(node) = self.nodes.get_mut(id) {
                        node.dimensions[dim].reset_view();
                        node.invalidate();
                    }
                }
            }
        }
        Ok(null)
    }

    /// Look up the atom `value` resolves to in `data`'s view of `dimension`, without interning.
    pub fn read(
        &mut self,
        data: DataId,
        dimension: &str,
        value: impl Into<SourceValue>,
    ) -> CubeResult<Option<AtomId>> {
        let dim = self.dim_index(dimension)?;
        self.read_at(data, dim, &value.into())
    }

    pub(crate) fn read_at(
        &mut self,
        data: DataId,
        dim: usize,
        value: &SourceValue,
    ) -> CubeResult<Option<AtomId>> {
        self.ensure_view(data, dim)?;
        let key = match value {
            SourceValue::Atom(atom) => match self.atoms.get(*atom) {
                Some(atom) if atom.dimension == dim => atom.key.to_string(),
                _ => return Ok(None),
            },
            SourceValue::Value(raw) => self.key_for(dim, raw),
        };
        let node = self.node(data)?;
        Ok(node.dimensions[dim].list().and_then(|list| list.get(&key)))
    }

    /// Canonical key `raw` interns to in dimension `dim` ("" for null).
    pub(crate) fn key_for(&self, dim: usize, raw: &Value) -> String {
        let dim_type = self.complex_type.dimension(dim);
        dim_type.key_of(&dim_type.typed_value(raw))
    }

    /// Ordered atoms of `dimension` in `data`. With `visible`, only atoms carried by at least one
    /// datum of that visibility.
    pub fn dimension_atoms(
        &mut self,
        data: DataId,
        dimension: &str,
        visible: Option<bool>,
    ) -> CubeResult<Vec<AtomId>> {
        let dim = self.dim_index(dimension)?;
        self.view_atoms(data, dim, visible)
    }

    pub fn atom_count(&mut self, data: DataId, dimension: &str) -> CubeResult<usize> {
        let dim = self.dim_index(dimension)?;
        self.ensure_view(data, dim)?;
        Ok(self.node(data)?.dimensions[dim].list().map_or(0, |l| l.len()))
    }

    pub fn index_of(
        &mut self,
        data: DataId,
        dimension: &str,
        atom: AtomId,
    ) -> CubeResult<Option<usize>> {
        let dim = self.dim_index(dimension)?;
        self.ensure_view(data, dim)?;
        Ok(self.node(data)?.dimensions[dim]
            .list()
            .and_then(|l| l.atoms().iter().position(|id| *id == atom)))
    }

    pub fn atom_by_key(
        &mut self,
        data: DataId,
        dimension: &str,
        key: &str,
    ) -> CubeResult<Option<AtomId>> {
        let dim = self.dim_index(dimension)?;
        self.ensure_view(data, dim)?;
        Ok(self.node(data)?.dimensions[dim]
            .list()
            .and_then(|l| l.get(key)))
    }

    /// The real null atom of `dimension` when `data`'s view holds one.
    pub fn null_atom(&mut self, data: DataId, dimension: &str) -> CubeResult<Option<AtomId>> {
        let dim = self.dim_index(dimension)?;
        self.ensure_view(data, dim)?;
        Ok(self.node(data)?.dimensions[dim]
            .list()
            .and_then(|l| l.atoms().first().copied())
            .filter(|id| self.atoms.get(*id).is_some_and(Atom::is_null)))
    }

    pub fn is_atom_visible(
        &mut self,
        data: DataId,
        dimension: &str,
        atom: AtomId,
    ) -> CubeResult<bool> {
        Ok(self
            .dimension_atoms(data, dimension, Some(true))?
            .contains(&atom))
    }

    /// First and last non-null atoms of `dimension` in `data`, in atom order.
    pub fn extent(
        &mut self,
        data: DataId,
        dimension: &str,
    ) -> CubeResult<Option<(AtomId, AtomId)>> {
        let atoms = self.dimension_atoms(data, dimension, None)?;
        let mut non_null = atoms
            .into_iter()
            .filter(|id| self.atoms.get(*id).is_some_and(|a| !a.is_null()));
        let Some(first) = non_null.next() else {
            return Ok(None);
        };
        Ok(Some((first, non_null.last().unwrap_or(first))))
    }

    /// Format `value` with `dimension`'s formatter.
    pub fn format(&self, dimension: &str, value: &Value) -> CubeResult<String> {
        let dim = self.dim_index(dimension)?;
        Ok(self.complex_type.dimension(dim).format(value))
    }

    /// Whether `data`'s view of `dimension` has been materialized.
    pub fn is_dimension_initialized(&self, data: DataId, dimension: &str) -> CubeResult<bool> {
        let dim = self.dim_index(dimension)?;
        Ok(matches!(
            self.node(data)?.dimensions[dim].view,
            AtomView::Initialized(_)
        ))
    }
}
