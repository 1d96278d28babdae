//! The store that owns every Data node, atom and datum of a forest.
//!
//! Data nodes form trees through `parent` (grouping children) and `link_parent` (grouping roots
//! and filtered views derived from another node). The topmost node of a tree that is reached
//! without crossing a link is the *owner*: it alone holds datums by right and interns atoms in
//! its dimensions. All other nodes reference the owner's datums and atoms by handle.

use crate::atom::Atom;
use crate::data::DataNode;
use crate::datum::{Datum, DatumView};
use crate::dimension::Dimension;
use crate::error::{CubeError, CubeResult};
use crate::keys::{AtomId, DataId, DatumId};
use crate::types::ComplexType;
use crate::value::Value;
use slotmap::SlotMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct CubeOptions {
    /// Label given to null atoms.
    pub null_label: Arc<str>,
    /// Separator used when joining atom keys into datum and group keys. Occurrences inside an
    /// atom key are escaped.
    pub key_separator: char,
    /// Separator used when joining atom labels into group labels.
    pub label_separator: String,
}

impl Default for CubeOptions {
    fn default() -> Self {
        Self {
            null_label: Arc::from(""),
            key_separator: '\u{1f}',
            label_separator: " ~ ".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct Cube {
    pub(crate) complex_type: Arc<ComplexType>,
    pub(crate) options: CubeOptions,
    pub(crate) nodes: SlotMap<DataId, DataNode>,
    pub(crate) atoms: SlotMap<AtomId, Atom>,
    pub(crate) datums: SlotMap<DatumId, Datum>,
}

impl Cube {
    pub fn new(complex_type: ComplexType) -> Self {
        Self::with_options(complex_type, CubeOptions::default())
    }

    pub fn with_options(complex_type: ComplexType, options: CubeOptions) -> Self {
        Self {
            complex_type: Arc::new(complex_type),
            options,
            nodes: SlotMap::with_key(),
            atoms: SlotMap::with_key(),
            datums: SlotMap::with_key(),
        }
    }

    pub fn complex_type(&self) -> &ComplexType {
        &self.complex_type
    }

    pub fn options(&self) -> &CubeOptions {
        &self.options
    }

    pub fn data(&self, id: DataId) -> Option<&DataNode> {
        self.nodes.get(id)
    }

    pub fn atom(&self, id: AtomId) -> Option<&Atom> {
        self.atoms.get(id)
    }

    pub fn datum(&self, id: DatumId) -> Option<&Datum> {
        self.datums.get(id)
    }

    pub fn datum_view(&self, id: DatumId) -> Option<DatumView<'_>> {
        self.datums.get(id).map(|datum| DatumView::new(self, datum))
    }

    pub fn is_disposed(&self, id: DataId) -> bool {
        !self.nodes.contains_key(id)
    }

    pub fn parent(&self, id: DataId) -> Option<DataId> {
        self.nodes.get(id)?.parent
    }

    pub fn link_parent(&self, id: DataId) -> Option<DataId> {
        self.nodes.get(id)?.link_parent
    }

    /// Number of live Data nodes, atoms and datums.
    pub fn stats(&self) -> CubeStats {
        CubeStats {
            nodes: self.nodes.len(),
            atoms: self.atoms.len(),
            datums: self.datums.len(),
        }
    }

    pub(crate) fn node(&self, id: DataId) -> CubeResult<&DataNode> {
        self.nodes.get(id).ok_or(CubeError::DataDisposed(id))
    }

    pub(crate) fn node_mut(&mut self, id: DataId) -> CubeResult<&mut DataNode> {
        self.nodes.get_mut(id).ok_or(CubeError::DataDisposed(id))
    }

    pub(crate) fn dim_index(&self, name: &str) -> CubeResult<usize> {
        self.complex_type.dimension_index(name)
    }

    /// Create a new owner Data node: the root of a tree that owns its datums and atoms.
    pub fn create_owner(&mut self) -> DataId {
        let dims = self.complex_type.len();
        let null_label = self.options.null_label.clone();
        let id = self
            .nodes
            .insert_with_key(|id| DataNode::new(id, id, None, None, 0, Vec::new()));

        let mut dimensions = Vec::with_capacity(dims);
        for dim in 0..dims {
            let virtual_null = self.atoms.insert_with_key(|atom_id| Atom {
                id: atom_id,
                owner: id,
                dimension: dim,
                value: Value::Null,
                raw: Value::Null,
                label: null_label.clone(),
                key: Arc::from(""),
                is_virtual: false,
                is_virtual_null: true,
            });
            dimensions.push(Dimension::owner(virtual_null));
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.dimensions = dimensions;
        }
        log::debug!("created owner data node {id}");
        id
    }

    /// Create a root derived from `link_parent`, sharing its owner and atoms.
    pub(crate) fn create_linked(&mut self, link_parent: DataId) -> CubeResult<DataId> {
        let source = self.node(link_parent)?;
        let owner = source.owner;
        let dims = self.complex_type.len();
        let id = self.nodes.insert_with_key(|id| {
            DataNode::new(
                id,
                owner,
                None,
                Some(link_parent),
                0,
                (0..dims).map(|_| Dimension::derived()).collect(),
            )
        });
        self.node_mut(link_parent)?.link_children.push(id);
        Ok(id)
    }

    /// Create a grouping child of `parent` fixing `level_atoms` on top of the parent's fixed
    /// atoms. The caller places it in `parent.child_nodes`.
    pub(crate) fn create_child(
        &mut self,
        parent: DataId,
        key: Arc<str>,
        label: String,
        level_atoms: &[(usize, AtomId)],
    ) -> CubeResult<DataId> {
        let parent_node = self.node(parent)?;
        let owner = parent_node.owner;
        let depth = parent_node.depth + 1;
        let root = parent_node.root;
        let mut fixed = parent_node.fixed_atoms.clone();
        for (dim, atom) in level_atoms {
            fixed.insert(*dim, *atom);
        }
        let dims = self.complex_type.len();
        let id = self.nodes.insert_with_key(|id| {
            let mut node = DataNode::new(
                id,
                owner,
                Some(parent),
                None,
                depth,
                (0..dims).map(|_| Dimension::derived()).collect(),
            );
            node.root = root;
            node.key = key.clone();
            node.label = label;
            node.fixed_atoms = fixed;
            node
        });
        self.node_mut(parent)?.child_by_key.insert(key, id);
        Ok(id)
    }

    /// `data` and every node reachable through `child_nodes` and `link_children`, parents
    /// before their dependents.
    pub(crate) fn subtree(&self, data: DataId) -> Vec<DataId> {
        let mut out = Vec::new();
        let mut stack = vec![data];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            out.push(id);
            stack.extend(node.link_children.iter().rev().copied());
            stack.extend(node.child_nodes.iter().rev().copied());
        }
        out
    }

    /// Dispose `data`, its children and link children, and their dimensions. Disposing an owner
    /// also releases its datums and atoms.
    pub fn dispose(&mut self, data: DataId) -> CubeResult<()> {
        let node = self.node(data)?;
        let parent = node.parent;
        let link_parent = node.link_parent;
        let key = node.key.clone();
        let is_owner = node.is_owner();

        let subtree = self.subtree(data);
        for id in subtree.iter().rev() {
            self.nodes.remove(*id);
        }

        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.child_nodes.retain(|c| *c != data);
            if parent.child_by_key.get(&key) == Some(&data) {
                parent.child_by_key.remove(&key);
            }
            parent.invalidate();
        }
        if let Some(source) = link_parent.and_then(|p| self.nodes.get_mut(p)) {
            source.link_children.retain(|c| *c != data);
            source.group_by_cache.retain(|_, root| *root != data);
        }

        if is_owner {
            let datums: Vec<DatumId> = self
                .datums
                .iter()
                .filter(|(_, d)| d.owner == data)
                .map(|(id, _)| id)
                .collect();
            for id in datums {
                self.datums.remove(id);
            }
            let atoms: Vec<AtomId> = self
                .atoms
                .iter()
                .filter(|(_, a)| a.owner == data)
                .map(|(id, _)| id)
                .collect();
            for id in atoms {
                self.atoms.remove(id);
            }
        }

        log::debug!("disposed data node {data} ({} nodes)", subtree.len());
        Ok(())
    }

    /// Dispose every child and link child of `data`, keeping `data` itself.
    pub fn dispose_dependents(&mut self, data: DataId) -> CubeResult<()> {
        let node = self.node(data)?;
        let dependents: Vec<DataId> = node
            .child_nodes
            .iter()
            .chain(node.link_children.iter())
            .copied()
            .collect();
        for id in dependents {
            if self.nodes.contains_key(id) {
                self.dispose(id)?;
            }
        }
        let node = self.node_mut(data)?;
        node.group_by_cache.clear();
        node.child_by_key.clear();
        Ok(())
    }

    /// Ancestor chain of `data` from the topmost node down to `data`, following `parent` and,
    /// where there is none, `link_parent`.
    pub fn ancestors(&self, data: DataId) -> Vec<DataId> {
        let mut chain = Vec::new();
        let mut current = Some(data);
        while let Some(id) = current {
            let Some(node) = self.nodes.get(id) else {
                break;
            };
            chain.push(id);
            current = node.parent.or(node.link_parent);
        }
        chain.reverse();
        chain
    }

    /// Lowest common ancestor of `nodes`, or `None` when two of them share no ancestor.
    pub fn lca(&self, nodes: &[DataId]) -> Option<DataId> {
        let (first, rest) = nodes.split_first()?;
        let mut common = self.ancestors(*first);
        for other in rest {
            let chain = self.ancestors(*other);
            let shared = common
                .iter()
                .zip(chain.iter())
                .take_while(|(a, b)| a == b)
                .count();
            if shared == 0 {
                return None;
            }
            common.truncate(shared);
        }
        common.last().copied()
    }

    /// Owner of the tree `data` belongs to.
    pub(crate) fn owner_of(&self, data: DataId) -> CubeResult<DataId> {
        Ok(self.node(data)?.owner)
    }

    pub(crate) fn group_label(&self, atoms: &[AtomId]) -> String {
        let labels: Vec<&str> = atoms
            .iter()
            .filter_map(|id| self.atoms.get(*id))
            .map(Atom::label)
            .collect();
        labels.join(&self.options.label_separator)
    }

    /// Join the keys of `atoms` with the key separator. When several keys are joined, the
    /// separator and the escape character inside a key are escaped, so distinct atom tuples of
    /// one arity never share a key.
    pub(crate) fn group_key(&self, atoms: &[AtomId]) -> Arc<str> {
        let separator = self.options.key_separator;
        if let [single] = atoms {
            return self
                .atoms
                .get(*single)
                .map_or_else(|| Arc::from(""), |atom| atom.key.clone());
        }
        let escape = if separator == '\\' { '\u{1b}' } else { '\\' };
        let mut key = String::new();
        for (i, id) in atoms.iter().enumerate() {
            if i > 0 {
                key.push(separator);
            }
            let Some(atom) = self.atoms.get(*id) else {
                continue;
            };
            for c in atom.key.chars() {
                if c == separator || c == escape {
                    key.push(escape);
                }
                key.push(c);
            }
        }
        Arc::from(key)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CubeStats {
    pub nodes: usize,
    pub atoms: usize,
    pub datums: usize,
}
