//! Per-frame display lists.
//!
//! Nodes live in one arena and are threaded into two singly-linked lists,
//! one per translucency state. Viewport nodes are linked into both lists so
//! each pass sees every state change; model nodes are linked into the lists
//! of the states they have vertices in.

use crate::backend::{RenderBackend, Winding};
use crate::cache::ModelRef;
use crate::error::{CacheKind, Real3dError, Resource};
use crate::math::{self, Mat4};
use crate::vertex::{PerState, PolyState};
use crate::viewport::ViewportState;

/// Winding to treat as front facing for one model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Clockwise,
    CounterClockwise,
    CullingDisabled,
}

impl FrontFace {
    /// Decide the winding for a model drawn with `model_view`.
    ///
    /// Two canonical edges and a normal pointing along the flipped base Z
    /// axis are transformed; if the transformed edges' cross product and
    /// normal disagree in Z, the matrix mirrors an axis and the winding
    /// flips. A zero sign leaves culling undecidable, so it is disabled.
    pub fn from_model_view(model_view: &Mat4, base_z: f32) -> Self {
        let x = math::mul_mat3_vec3(model_view, &[1.0, 0.0, 0.0]);
        let y = math::mul_mat3_vec3(model_view, &[0.0, 1.0, 0.0]);
        let normal_matrix = math::invert_transpose3(model_view);
        let z = math::mul_mat3_vec3(&normal_matrix, &[0.0, 0.0, -base_z]);
        let p = math::cross(&x, &y);
        let s = math::sign(z[2] * p[2]);
        if s < 0.0 {
            FrontFace::CounterClockwise
        } else if s > 0.0 {
            FrontFace::Clockwise
        } else {
            FrontFace::CullingDisabled
        }
    }

    pub fn winding(self) -> Option<Winding> {
        match self {
            FrontFace::Clockwise => Some(Winding::Clockwise),
            FrontFace::CounterClockwise => Some(Winding::CounterClockwise),
            FrontFace::CullingDisabled => None,
        }
    }
}

/// A model drawn with one transform.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInstance {
    pub model_view: Mat4,
    pub front_face: FrontFace,
    pub first: PerState<u32>,
    pub count: PerState<u32>,
}

impl ModelInstance {
    pub fn new(model: &ModelRef, model_view: Mat4, front_face: FrontFace) -> Self {
        Self {
            model_view,
            front_face,
            first: model.index,
            count: model.num_verts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Viewport(Box<ViewportState>),
    Model(ModelInstance),
}

#[derive(Debug, Clone)]
struct DisplayNode {
    kind: NodeKind,
    next: PerState<Option<usize>>,
}

/// Display lists for one cache and one layer.
#[derive(Debug)]
pub struct DisplayList {
    cache: CacheKind,
    nodes: Vec<DisplayNode>,
    max_nodes: usize,
    head: PerState<Option<usize>>,
    tail: PerState<Option<usize>>,
    /// Model nodes per state.
    models: PerState<u32>,
}

impl DisplayList {
    pub fn new(cache: CacheKind, max_nodes: usize) -> Self {
        Self {
            cache,
            nodes: Vec::with_capacity(max_nodes),
            max_nodes,
            head: PerState::default(),
            tail: PerState::default(),
            models: PerState::default(),
        }
    }

    pub fn cache(&self) -> CacheKind {
        self.cache
    }

    /// Nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head = PerState::default();
        self.tail = PerState::default();
        self.models = PerState::default();
    }

    fn push(&mut self, kind: NodeKind, states: PerState<bool>) -> Result<(), Real3dError> {
        // Two slots: room for the viewport that may precede the next model.
        if self.nodes.len() + 2 > self.max_nodes {
            return Err(Real3dError::capacity(Resource::DisplayList));
        }
        let idx = self.nodes.len();
        self.nodes.push(DisplayNode {
            kind,
            next: PerState::default(),
        });
        for state in PolyState::ALL {
            if !states[state] {
                continue;
            }
            match self.tail[state] {
                Some(tail) => self.nodes[tail].next[state] = Some(idx),
                None => self.head[state] = Some(idx),
            }
            self.tail[state] = Some(idx);
        }
        Ok(())
    }

    pub fn append_viewport(&mut self, viewport: &ViewportState) -> Result<(), Real3dError> {
        self.push(
            NodeKind::Viewport(Box::new(viewport.clone())),
            PerState::new(true, true),
        )
    }

    /// Append a model instance to the lists of the states it has vertices in.
    /// Models without vertices are not added.
    pub fn append_model(&mut self, instance: ModelInstance) -> Result<(), Real3dError> {
        let states = PerState::new(instance.count.opaque > 0, instance.count.alpha > 0);
        if !states.opaque && !states.alpha {
            return Ok(());
        }
        self.push(NodeKind::Model(instance), states)?;
        for state in PolyState::ALL {
            if states[state] {
                self.models[state] += 1;
            }
        }
        Ok(())
    }

    /// Model instances in one state's list.
    pub fn model_count(&self, state: PolyState) -> u32 {
        self.models[state]
    }

    /// Nodes of one state's list in order.
    pub fn iter(&self, state: PolyState) -> impl Iterator<Item = &NodeKind> + '_ {
        let mut cursor = self.head[state];
        std::iter::from_fn(move || {
            let idx = cursor?;
            let node = &self.nodes[idx];
            cursor = node.next[state];
            Some(&node.kind)
        })
    }

    /// Replay one state's list. Returns the number of draws issued. Lists
    /// holding only viewports issue nothing.
    pub fn render(&self, state: PolyState, backend: &mut dyn RenderBackend) -> u32 {
        if self.models[state] == 0 {
            return 0;
        }
        backend.begin_pass(self.cache, state);

        let mut draws = 0;
        let mut cursor = self.head[state];
        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            cursor = node.next[state];
            match &node.kind {
                NodeKind::Viewport(viewport) => {
                    // Only matters if a model follows before the next viewport.
                    let next_is_model = cursor
                        .map(|n| matches!(self.nodes[n].kind, NodeKind::Model(_)))
                        .unwrap_or(false);
                    if next_is_model {
                        backend.apply_viewport(viewport);
                    }
                }
                NodeKind::Model(model) => {
                    match model.front_face.winding() {
                        None => backend.set_culling(false),
                        Some(winding) => {
                            if backend.front_face() != winding {
                                backend.set_front_face(winding);
                            }
                        }
                    }
                    backend.draw(&model.model_view, model.first[state], model.count[state]);
                    draws += 1;
                    if model.front_face == FrontFace::CullingDisabled {
                        backend.set_culling(true);
                    }
                }
            }
        }
        draws
    }
}
