//! Extent-keyed spatial tree for candidate donor queries
//!
//! A static bounding tree: items are split at the median along the longest
//! axis of their centroid cloud, and every internal node keeps the bounding
//! box of its subtree. Retrieval walks only the branches whose boxes touch
//! the probe extent.

use chimera_mesh::Extent;

enum Node {
    Leaf {
        bounds: Extent,
        id: usize,
    },
    Branch {
        bounds: Extent,
        left: usize,
        right: usize,
    },
}

pub struct Adt {
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl Adt {
    /// Build from `(id, extent)` items.
    pub fn build(items: Vec<(usize, Extent)>) -> Adt {
        let mut tree = Adt {
            nodes: Vec::with_capacity(2 * items.len()),
            root: None,
        };
        if !items.is_empty() {
            let mut items = items;
            let root = tree.build_node(&mut items);
            tree.root = Some(root);
        }
        tree
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    fn build_node(&mut self, items: &mut [(usize, Extent)]) -> usize {
        if items.len() == 1 {
            let (id, bounds) = items[0];
            self.nodes.push(Node::Leaf { bounds, id });
            return self.nodes.len() - 1;
        }
        let mut centroid_cloud = Extent::empty();
        for (_, extent) in items.iter() {
            centroid_cloud.add_point(&extent.center());
        }
        let axis = centroid_cloud.longest_axis();
        items.sort_by(|a, b| {
            a.1.center()[axis]
                .partial_cmp(&b.1.center()[axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mid = items.len() / 2;
        let (left_items, right_items) = items.split_at_mut(mid);
        let left = self.build_node(left_items);
        let right = self.build_node(right_items);
        let mut bounds = self.bounds_of(left);
        bounds.union(&self.bounds_of(right));
        self.nodes.push(Node::Branch { bounds, left, right });
        self.nodes.len() - 1
    }

    fn bounds_of(&self, node: usize) -> Extent {
        match &self.nodes[node] {
            Node::Leaf { bounds, .. } => *bounds,
            Node::Branch { bounds, .. } => *bounds,
        }
    }

    /// Ids of all stored extents overlapping the probe.
    pub fn retrieve(&self, probe: &Extent) -> Vec<usize> {
        let mut hits = Vec::new();
        if let Some(root) = self.root {
            self.collect(root, probe, &mut hits);
        }
        hits
    }

    fn collect(&self, node: usize, probe: &Extent, hits: &mut Vec<usize>) {
        match &self.nodes[node] {
            Node::Leaf { bounds, id } => {
                if bounds.overlaps(probe) {
                    hits.push(*id);
                }
            }
            Node::Branch { bounds, left, right } => {
                if bounds.overlaps(probe) {
                    self.collect(*left, probe, hits);
                    self.collect(*right, probe, hits);
                }
            }
        }
    }
}
