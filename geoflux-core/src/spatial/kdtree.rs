//! Arena-backed k-d tree
//!
//! Nodes live in one `Vec` and refer to their children by index. Every node
//! carries the bounding rectangle of its subtree, so queries prune on
//! geometry rather than on split planes and stay correct after mixing bulk
//! loads with incremental inserts.
//!
//! Inserts keep the tree scapegoat-balanced: no node sits deeper than
//! `log(n) / log(1 / ALPHA)`. When an insert breaks that, the lowest ancestor
//! whose subtree is too tall for its size is rebuilt around its median.

use super::bound::Bound;
use super::point::{Rect, SpatialPoint};
use crate::RowId;
use roaring::RoaringBitmap;

type NodeId = u32;

/// Balance factor bounding depth to `log(n) / log(1 / ALPHA)`
const ALPHA: f64 = 0.7;

#[derive(Debug, Clone)]
struct Node {
    point: SpatialPoint,
    row_id: RowId,
    axis: usize,
    left: Option<NodeId>,
    right: Option<NodeId>,
    extent: Rect,
    /// Nodes in this subtree, itself included
    size: u32,
}

impl Node {
    fn leaf(point: SpatialPoint, row_id: RowId, axis: usize) -> Self {
        let extent = Rect::from_point(&point);
        Self {
            point,
            row_id,
            axis,
            left: None,
            right: None,
            extent,
            size: 1,
        }
    }
}

/// Spatial index mapping points to the rows that carry them
#[derive(Debug, Clone)]
pub struct KdTree {
    arity: usize,
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl KdTree {
    /// Create an empty tree for points of `arity` coordinates
    pub fn new(arity: usize) -> Self {
        Self {
            arity,
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Build a balanced tree from all entries at once
    ///
    /// Splits on the median of the cycling axis, so depth is
    /// `ceil(log2(n + 1))` regardless of input order.
    pub fn bulk_load(arity: usize, entries: Vec<(SpatialPoint, RowId)>) -> Self {
        let mut tree = Self {
            arity,
            nodes: Vec::with_capacity(entries.len()),
            root: None,
        };
        let mut order: Vec<u32> = (0..entries.len() as u32).collect();
        let mut slots: Vec<Option<(SpatialPoint, RowId)>> = entries.into_iter().map(Some).collect();
        tree.root = tree.build(&mut slots, &mut order, 0, &mut Vec::new());
        tree
    }

    /// Build a balanced subtree, reusing node slots from `free` first
    fn build(
        &mut self,
        slots: &mut [Option<(SpatialPoint, RowId)>],
        order: &mut [u32],
        depth: usize,
        free: &mut Vec<NodeId>,
    ) -> Option<NodeId> {
        if order.is_empty() {
            return None;
        }
        let axis = depth % self.arity;
        let mid = order.len() / 2;
        order.select_nth_unstable_by(mid, |&a, &b| {
            let ka = slots[a as usize].as_ref().map_or(f64::NAN, |(p, _)| p.get(axis));
            let kb = slots[b as usize].as_ref().map_or(f64::NAN, |(p, _)| p.get(axis));
            ka.total_cmp(&kb)
        });

        let (point, row_id) = slots[order[mid] as usize].take()?;
        let leaf = Node::leaf(point, row_id, axis);
        let id = match free.pop() {
            Some(id) => {
                self.nodes[id as usize] = leaf;
                id
            }
            None => {
                self.nodes.push(leaf);
                (self.nodes.len() - 1) as NodeId
            }
        };

        let (left_half, rest) = order.split_at_mut(mid);
        let right_half = &mut rest[1..];
        let left = self.build(slots, left_half, depth + 1, free);
        let right = self.build(slots, right_half, depth + 1, free);

        let mut extent = self.nodes[id as usize].extent.clone();
        let mut size = 1;
        for child in [left, right].into_iter().flatten() {
            let child = &self.nodes[child as usize];
            extent.union(&child.extent);
            size += child.size;
        }
        let node = &mut self.nodes[id as usize];
        node.left = left;
        node.right = right;
        node.extent = extent;
        node.size = size;
        Some(id)
    }

    /// Insert one point for a row
    ///
    /// Points whose arity differs from the tree's are ignored; callers
    /// parse against the declared arity first.
    pub fn insert(&mut self, point: SpatialPoint, row_id: RowId) {
        if point.arity() != self.arity {
            return;
        }
        let new_id = self.nodes.len() as NodeId;
        let Some(mut current) = self.root else {
            self.root = Some(new_id);
            self.nodes.push(Node::leaf(point, row_id, 0));
            return;
        };

        let mut path = Vec::new();
        let axis = loop {
            path.push(current);
            let node = &mut self.nodes[current as usize];
            node.extent.expand(&point);
            node.size += 1;
            let go_left = point.get(node.axis) < node.point.get(node.axis);
            let next = if go_left { node.left } else { node.right };
            match next {
                Some(child) => current = child,
                None => {
                    if go_left {
                        node.left = Some(new_id);
                    } else {
                        node.right = Some(new_id);
                    }
                    break (node.axis + 1) % self.arity;
                }
            }
        };
        self.nodes.push(Node::leaf(point, row_id, axis));

        if path.len() > depth_limit(self.nodes.len()) {
            self.rebalance(&path);
        }
    }

    /// Rebuild the lowest ancestor on `path` whose subtree is too deep for
    /// its size now that a node hangs below the last entry
    fn rebalance(&mut self, path: &[NodeId]) {
        for (i, &id) in path.iter().enumerate().rev() {
            let size = self.nodes[id as usize].size as usize;
            if path.len() - i > depth_limit(size) {
                let rebuilt = self.rebuild(id);
                match i.checked_sub(1).map(|p| path[p]) {
                    Some(parent) => {
                        let parent = &mut self.nodes[parent as usize];
                        if parent.left == Some(id) {
                            parent.left = rebuilt;
                        } else {
                            parent.right = rebuilt;
                        }
                    }
                    None => self.root = rebuilt,
                }
                return;
            }
        }
    }

    /// Rebuild the subtree at `root` in place, returning its new root
    fn rebuild(&mut self, root: NodeId) -> Option<NodeId> {
        let axis = self.nodes[root as usize].axis;
        let mut ids = Vec::with_capacity(self.nodes[root as usize].size as usize);
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            ids.push(id);
            stack.extend(node.left);
            stack.extend(node.right);
        }

        let mut slots: Vec<Option<(SpatialPoint, RowId)>> = ids
            .iter()
            .map(|&id| {
                let node = &self.nodes[id as usize];
                Some((node.point.clone(), node.row_id))
            })
            .collect();
        let mut order: Vec<u32> = (0..slots.len() as u32).collect();
        self.build(&mut slots, &mut order, axis, &mut ids)
    }

    /// All rows with at least one point inside `bound`
    pub fn query(&self, bound: &Bound) -> RoaringBitmap {
        let mut result = RoaringBitmap::new();
        let Some(root) = self.root else {
            return result;
        };
        if bound.arity() != self.arity {
            return result;
        }

        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            if !bound.intersects(&node.extent) {
                continue;
            }
            if bound.covers(&node.extent) {
                self.collect_subtree(id, &mut result);
                continue;
            }
            if bound.contains(&node.point) {
                result.insert(node.row_id);
            }
            stack.extend(node.left);
            stack.extend(node.right);
        }
        result
    }

    fn collect_subtree(&self, root: NodeId, result: &mut RoaringBitmap) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            result.insert(node.row_id);
            stack.extend(node.left);
            stack.extend(node.right);
        }
    }

    /// Iterate every indexed `(point, row)` pair
    pub fn entries(&self) -> impl Iterator<Item = (&SpatialPoint, RowId)> {
        self.nodes.iter().map(|n| (&n.point, n.row_id))
    }

    /// Bounding rectangle of all points
    pub fn extent(&self) -> Option<&Rect> {
        self.root.map(|r| &self.nodes[r as usize].extent)
    }

    /// Height of the tree (0 when empty)
    pub fn depth(&self) -> usize {
        let Some(root) = self.root else {
            return 0;
        };
        let mut max_depth = 0;
        let mut stack = vec![(root, 1usize)];
        while let Some((id, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            let node = &self.nodes[id as usize];
            for child in [node.left, node.right].into_iter().flatten() {
                stack.push((child, depth + 1));
            }
        }
        max_depth
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Number of indexed points
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Deepest node depth (root at 0) tolerated in a subtree of `size` nodes
fn depth_limit(size: usize) -> usize {
    ((size as f64).ln() / (1.0 / ALPHA).ln()).floor() as usize
}
