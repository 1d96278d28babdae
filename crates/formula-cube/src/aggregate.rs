//! Sums and percentages over grouping trees.
//!
//! A leaf's value is the signed sum of its datums. A node with children adds up the absolute
//! values of its children, so a parent always covers its children and percentages of siblings
//! add up to one.

use crate::cube::Cube;
use crate::error::CubeResult;
use crate::keys::DataId;
use crate::query::QueryArgs;
use std::fmt;
use std::sync::Arc;

/// Picks the dimension whose values are summed at a node.
pub type DiscriminatorFn = Arc<dyn Fn(&Cube, DataId, bool) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub enum Discriminator {
    Dimension(String),
    /// `f(cube, node, is_optional)` names the dimension for a node. When it returns `None`, the
    /// values of every dimension in `possible_dims` are summed. `key` identifies the function in
    /// aggregate caches; without it results are not cached.
    Function {
        f: DiscriminatorFn,
        key: Option<String>,
        possible_dims: Vec<String>,
    },
}

impl fmt::Debug for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discriminator::Dimension(name) => f.debug_tuple("Dimension").field(name).finish(),
            Discriminator::Function {
                key, possible_dims, ..
            } => f
                .debug_struct("Function")
                .field("key", key)
                .field("possible_dims", possible_dims)
                .finish(),
        }
    }
}

impl Discriminator {
    pub fn dimension(name: impl Into<String>) -> Self {
        Discriminator::Dimension(name.into())
    }

    pub fn function<S: Into<String>>(
        f: impl Fn(&Cube, DataId, bool) -> Option<String> + Send + Sync + 'static,
        key: Option<&str>,
        possible_dims: impl IntoIterator<Item = S>,
    ) -> Self {
        Discriminator::Function {
            f: Arc::new(f),
            key: key.map(str::to_string),
            possible_dims: possible_dims.into_iter().map(Into::into).collect(),
        }
    }

    fn cache_key(&self) -> Option<String> {
        match self {
            Discriminator::Dimension(name) => Some(name.clone()),
            Discriminator::Function {
                key: Some(key),
                possible_dims,
                ..
            } => Some(format!("{key}|{}", possible_dims.join(","))),
            Discriminator::Function { key: None, .. } => None,
        }
    }

    fn dimensions(&self, cube: &Cube, data: DataId) -> Vec<String> {
        match self {
            Discriminator::Dimension(name) => vec![name.clone()],
            Discriminator::Function {
                f, possible_dims, ..
            } => match f(cube, data, true) {
                Some(name) => vec![name],
                None => possible_dims.clone(),
            },
        }
    }
}

/// Signed and absolute totals of one dimension.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DimensionSum {
    pub sum: f64,
    pub abs_sum: f64,
}

impl Cube {
    /// Value of `data` for the discriminated dimension, over datums accepted by `args`.
    pub fn dimension_number_value(
        &mut self,
        data: DataId,
        discriminator: &Discriminator,
        args: &QueryArgs,
    ) -> CubeResult<f64> {
        let cache_key = match (discriminator.cache_key(), args.cache_key()) {
            (Some(discrim), Some(filter)) => Some(format!("{discrim}|{filter}")),
            _ => None,
        };
        if let Some(key) = &cache_key {
            if let Some(value) = self.node(data)?.aggregate_cache.get(key) {
                log::trace!("aggregate cache hit for {data} [{key}]");
                return Ok(*value);
            }
        }

        let children = self.node(data)?.child_nodes.clone();
        let value = if children.is_empty() {
            let dims = discriminator
                .dimensions(self, data)
                .iter()
                .map(|name| self.dim_index(name))
                .collect::<CubeResult<Vec<_>>>()?;
            self.leaf_sum(data, &dims, args)?.sum
        } else {
            let mut total = 0.0;
            for child in children {
                total += self
                    .dimension_number_value(child, discriminator, args)?
                    .abs();
            }
            total
        };

        if let Some(key) = cache_key {
            self.node_mut(data)?.aggregate_cache.insert(key, value);
        }
        Ok(value)
    }

    /// Share of `data` in its parent: `|value| / parent value`. A root is 1, or 0 when its own
    /// value is 0; a node under a zero parent is 0.
    pub fn dimension_percent_value(
        &mut self,
        data: DataId,
        discriminator: &Discriminator,
        args: &QueryArgs,
    ) -> CubeResult<f64> {
        let value = self.dimension_number_value(data, discriminator, args)?;
        let Some(parent) = self.node(data)?.parent else {
            return Ok(if value == 0.0 { 0.0 } else { 1.0 });
        };
        let parent_value = self.dimension_number_value(parent, discriminator, args)?;
        if parent_value == 0.0 {
            return Ok(0.0);
        }
        Ok(value.abs() / parent_value)
    }

    /// Flat totals of `dimension` over the datums of `data` accepted by `args`.
    pub fn dimension_sum(
        &self,
        data: DataId,
        dimension: &str,
        args: &QueryArgs,
    ) -> CubeResult<DimensionSum> {
        let dim = self.dim_index(dimension)?;
        self.leaf_sum(data, &[dim], args)
    }

    fn leaf_sum(&self, data: DataId, dims: &[usize], args: &QueryArgs) -> CubeResult<DimensionSum> {
        let node = self.node(data)?;
        let mut total = DimensionSum::default();
        for id in &node.datums {
            let Some(datum) = self.datums.get(*id) else {
                continue;
            };
            if !args.accepts(self, datum) {
                continue;
            }
            for dim in dims {
                let value = self
                    .atoms
                    .get(datum.atoms[*dim])
                    .and_then(|atom| atom.value.as_number())
                    .unwrap_or(0.0);
                total.sum += value;
                total.abs_sum += value.abs();
            }
        }
        Ok(total)
    }
}
