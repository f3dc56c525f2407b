//! The append-only history of model versions.
//!
//! Every completed party appends one layer derived from the newest layer at that time. Layers are
//! stored in an arena and refer to each other by [`LayerId`], so the history is a tree rooted at
//! the initial model: two parties completing one after the other without a round in between
//! produce a chain, but nothing stops the history from branching and callers must not assume a
//! total order beyond the one given by the ids.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use derive_more::{Display, From, Into};

use fedsum_core::model::{PrivatePart, Weights};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
/// Index of a layer in the [`ModelHistory`].
pub struct LayerId(usize);

#[derive(Debug, Clone)]
/// One version of the model.
pub struct ModelLayer {
    pub id: LayerId,
    /// The layer this one was derived from. Only the root has none.
    pub parent: Option<LayerId>,
    pub weights: Arc<Weights>,
    /// The party total this layer was derived from, before averaging.
    pub sum_of_partials: Option<PrivatePart>,
    pub created_at: DateTime<Utc>,
    pub children: Vec<LayerId>,
}

#[derive(Debug)]
/// Arena of model layers with a pointer to the newest one.
pub struct ModelHistory {
    layers: Vec<ModelLayer>,
    newest: LayerId,
}

impl ModelHistory {
    /// Creates a history consisting of the initial model only.
    pub fn new(root: Weights) -> Self {
        let root = ModelLayer {
            id: LayerId(0),
            parent: None,
            weights: Arc::new(root),
            sum_of_partials: None,
            created_at: Utc::now(),
            children: Vec::new(),
        };
        Self {
            layers: vec![root],
            newest: LayerId(0),
        }
    }

    pub fn root(&self) -> &ModelLayer {
        &self.layers[0]
    }

    /// The layer served to participants.
    pub fn newest(&self) -> &ModelLayer {
        &self.layers[self.newest.0]
    }

    pub fn get(&self, id: LayerId) -> Option<&ModelLayer> {
        self.layers.get(id.0)
    }

    /// Number of layers, including the root.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Appends a layer as a child of `parent` and makes it the newest layer.
    ///
    /// Returns `None` if `parent` doesn't exist.
    pub fn append(
        &mut self,
        parent: LayerId,
        weights: Weights,
        sum_of_partials: PrivatePart,
    ) -> Option<LayerId> {
        let id = LayerId(self.layers.len());
        self.layers.get_mut(parent.0)?.children.push(id);
        self.layers.push(ModelLayer {
            id,
            parent: Some(parent),
            weights: Arc::new(weights),
            sum_of_partials: Some(sum_of_partials),
            created_at: Utc::now(),
            children: Vec::new(),
        });
        self.newest = id;
        Some(id)
    }

    /// The ids from a layer up to the root, starting with the layer itself.
    pub fn lineage(&self, id: LayerId) -> Vec<LayerId> {
        let mut lineage = Vec::new();
        let mut current = self.get(id);
        while let Some(layer) = current {
            lineage.push(layer.id);
            current = layer.parent.and_then(|parent| self.get(parent));
        }
        lineage
    }
}
