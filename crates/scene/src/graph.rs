//! Index-based scene graph.
//!
//! Nodes live in one `Vec` and refer to each other by [`NodeId`]. Each node
//! keeps its parent index and its child indices; there are no owning
//! pointers between nodes, so the graph has no reference cycles to manage.
//!
//! World matrices are `parent_world * local`. [`SceneGraph::world_matrix`]
//! walks parent links on demand; [`SceneGraph::update_world_transforms`]
//! refreshes the cached copy of every node in one top-down pass.
//!
//! ```
//! use ember_scene::{SceneGraph, Transform};
//! use glam::Vec3;
//!
//! let mut scene = SceneGraph::new();
//! let root = scene.add_root("root", Transform::new().with_position(Vec3::X));
//! let child = scene
//!     .add_child(root, "child", Transform::new().with_position(Vec3::Y))
//!     .unwrap();
//!
//! scene.update_world_transforms();
//! let p = scene.cached_world(child).unwrap().transform_point3(Vec3::ZERO);
//! assert!((p - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-5);
//! ```

use glam::Mat4;
use thiserror::Error;
use tracing::debug;

use crate::transform::Transform;

/// Index of a node in its [`SceneGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    #[error("Unknown scene node {0:?}")]
    UnknownNode(NodeId),

    #[error("Parenting {node:?} under {parent:?} would create a cycle")]
    Cycle { node: NodeId, parent: NodeId },
}

#[derive(Debug)]
struct Node {
    name: String,
    local: Transform,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    world: Mat4,
}

/// Arena of transform nodes.
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a node without a parent.
    pub fn add_root(&mut self, name: impl Into<String>, local: Transform) -> NodeId {
        self.push(name.into(), local, None)
    }

    /// Adds a node under `parent`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        local: Transform,
    ) -> Result<NodeId, SceneError> {
        self.node(parent)?;
        let id = self.push(name.into(), local, Some(parent));
        self.nodes[parent.index()].children.push(id);
        Ok(id)
    }

    fn push(&mut self, name: String, local: Transform, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        debug!("Scene node {:?} '{}' added", id, name);
        self.nodes.push(Node {
            name,
            world: local.local_matrix(),
            local,
            parent,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, id: NodeId) -> Result<&Node, SceneError> {
        self.nodes.get(id.index()).ok_or(SceneError::UnknownNode(id))
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.index()).map(|node| node.name.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.index()).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.index())
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Nodes without a parent, in insertion order.
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(index, _)| NodeId(index as u32))
    }

    pub fn local(&self, id: NodeId) -> Option<&Transform> {
        self.nodes.get(id.index()).map(|node| &node.local)
    }

    /// Mutable local transform. Cached world matrices are stale until the
    /// next [`update_world_transforms`](Self::update_world_transforms).
    pub fn local_mut(&mut self, id: NodeId) -> Option<&mut Transform> {
        self.nodes.get_mut(id.index()).map(|node| &mut node.local)
    }

    /// Moves `node` under `new_parent`, or makes it a root with `None`.
    ///
    /// # Errors
    ///
    /// [`SceneError::Cycle`] if `new_parent` is `node` or one of its
    /// descendants; [`SceneError::UnknownNode`] for a stale id.
    pub fn reparent(&mut self, node: NodeId, new_parent: Option<NodeId>) -> Result<(), SceneError> {
        self.node(node)?;
        if let Some(parent) = new_parent {
            self.node(parent)?;
            if self.is_ancestor_or_self(node, parent) {
                return Err(SceneError::Cycle { node, parent });
            }
        }

        if let Some(old) = self.nodes[node.index()].parent {
            self.nodes[old.index()].children.retain(|&child| child != node);
        }
        if let Some(parent) = new_parent {
            self.nodes[parent.index()].children.push(node);
        }
        self.nodes[node.index()].parent = new_parent;
        Ok(())
    }

    /// True if `ancestor` is `node` or lies on `node`'s parent chain.
    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.parent(node) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// World matrix computed by walking parent links.
    pub fn world_matrix(&self, id: NodeId) -> Result<Mat4, SceneError> {
        let mut matrix = self.node(id)?.local.local_matrix();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            let node = self.node(parent)?;
            matrix = node.local.local_matrix() * matrix;
            current = node.parent;
        }
        Ok(matrix)
    }

    /// World matrix as of the last [`update_world_transforms`](Self::update_world_transforms).
    pub fn cached_world(&self, id: NodeId) -> Option<Mat4> {
        self.nodes.get(id.index()).map(|node| node.world)
    }

    /// Recomputes every cached world matrix, parents before children.
    pub fn update_world_transforms(&mut self) {
        let mut stack: Vec<(NodeId, Mat4)> = self.roots().map(|id| (id, Mat4::IDENTITY)).collect();

        while let Some((id, parent_world)) = stack.pop() {
            let node = &mut self.nodes[id.index()];
            node.world = parent_world * node.local.local_matrix();
            let world = node.world;
            stack.extend(node.children.iter().map(|&child| (child, world)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};
    use rstest::rstest;

    fn at(x: f32, y: f32, z: f32) -> Transform {
        Transform::new().with_position(Vec3::new(x, y, z))
    }

    fn origin_of(matrix: Mat4) -> Vec3 {
        matrix.transform_point3(Vec3::ZERO)
    }

    fn assert_near(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-4, "expected {:?}, got {:?}", b, a);
    }

    #[test]
    fn test_add_child_links_both_directions() {
        let mut scene = SceneGraph::new();
        let root = scene.add_root("root", Transform::IDENTITY);
        let child = scene.add_child(root, "child", Transform::IDENTITY).unwrap();

        assert_eq!(scene.parent(child), Some(root));
        assert_eq!(scene.children(root), &[child]);
        assert_eq!(scene.roots().collect::<Vec<_>>(), vec![root]);
        assert_eq!(scene.name(child), Some("child"));
    }

    #[test]
    fn test_add_child_to_unknown_parent() {
        let mut scene = SceneGraph::new();
        let err = scene
            .add_child(NodeId(7), "orphan", Transform::IDENTITY)
            .unwrap_err();
        assert_eq!(err, SceneError::UnknownNode(NodeId(7)));
        assert!(scene.is_empty());
    }

    #[rstest]
    #[case::translation(at(10.0, 0.0, 0.0), at(0.0, 5.0, 0.0), Vec3::new(10.0, 5.0, 0.0))]
    #[case::scale(
        Transform::new().with_scale(Vec3::splat(2.0)),
        at(1.0, 0.0, 0.0),
        Vec3::new(2.0, 0.0, 0.0)
    )]
    #[case::rotation(
        Transform::new().with_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2)),
        at(1.0, 0.0, 0.0),
        Vec3::new(0.0, 0.0, -1.0)
    )]
    fn test_world_matrix_composes_parent(
        #[case] parent: Transform,
        #[case] child: Transform,
        #[case] expected: Vec3,
    ) {
        let mut scene = SceneGraph::new();
        let p = scene.add_root("parent", parent);
        let c = scene.add_child(p, "child", child).unwrap();
        assert_near(origin_of(scene.world_matrix(c).unwrap()), expected);
    }

    #[test]
    fn test_update_world_transforms_matches_walk() {
        let mut scene = SceneGraph::new();
        let a = scene.add_root("a", at(100.0, 0.0, 0.0));
        let b = scene.add_child(a, "b", at(10.0, 0.0, 0.0)).unwrap();
        let c = scene.add_child(b, "c", at(1.0, 0.0, 0.0)).unwrap();

        scene.update_world_transforms();

        for id in [a, b, c] {
            assert_eq!(scene.cached_world(id), scene.world_matrix(id).ok());
        }
        assert_near(
            origin_of(scene.cached_world(c).unwrap()),
            Vec3::new(111.0, 0.0, 0.0),
        );
    }

    #[test]
    fn test_cache_is_stale_until_update() {
        let mut scene = SceneGraph::new();
        let root = scene.add_root("root", Transform::IDENTITY);
        let child = scene.add_child(root, "child", Transform::IDENTITY).unwrap();
        scene.update_world_transforms();

        scene.local_mut(root).unwrap().position = Vec3::new(0.0, 3.0, 0.0);
        assert_near(origin_of(scene.cached_world(child).unwrap()), Vec3::ZERO);

        scene.update_world_transforms();
        assert_near(
            origin_of(scene.cached_world(child).unwrap()),
            Vec3::new(0.0, 3.0, 0.0),
        );
    }

    #[test]
    fn test_reparent_moves_child_list() {
        let mut scene = SceneGraph::new();
        let a = scene.add_root("a", at(1.0, 0.0, 0.0));
        let b = scene.add_root("b", at(0.0, 0.0, 5.0));
        let c = scene.add_child(a, "c", Transform::IDENTITY).unwrap();

        scene.reparent(c, Some(b)).unwrap();

        assert!(scene.children(a).is_empty());
        assert_eq!(scene.children(b), &[c]);
        assert_near(
            origin_of(scene.world_matrix(c).unwrap()),
            Vec3::new(0.0, 0.0, 5.0),
        );
    }

    #[test]
    fn test_reparent_to_none_makes_root() {
        let mut scene = SceneGraph::new();
        let a = scene.add_root("a", Transform::IDENTITY);
        let b = scene.add_child(a, "b", Transform::IDENTITY).unwrap();

        scene.reparent(b, None).unwrap();

        assert_eq!(scene.parent(b), None);
        assert_eq!(scene.roots().count(), 2);
    }

    #[test]
    fn test_reparent_rejects_cycles() {
        let mut scene = SceneGraph::new();
        let a = scene.add_root("a", Transform::IDENTITY);
        let b = scene.add_child(a, "b", Transform::IDENTITY).unwrap();
        let c = scene.add_child(b, "c", Transform::IDENTITY).unwrap();

        assert_eq!(
            scene.reparent(a, Some(c)),
            Err(SceneError::Cycle { node: a, parent: c })
        );
        assert_eq!(
            scene.reparent(b, Some(b)),
            Err(SceneError::Cycle { node: b, parent: b })
        );
        assert_eq!(scene.parent(a), None);
        assert_eq!(scene.children(b), &[c]);
    }
}
