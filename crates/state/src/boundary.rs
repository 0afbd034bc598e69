//! World boundary inference.
//!
//! The server only ever reports the current viewport rectangle. The viewport
//! is clamped at the true world edges, so when the reference entity sits
//! closer to a viewport edge than to the viewport centre, that edge is taken
//! to be a world edge. Resolved edges never change for the rest of the
//! session.

use crate::DEFAULT_WORLD_SIZE;

/// Viewport rectangle reported by a border frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Border {
    pub start_x: f64,
    pub start_y: f64,
    pub end_x: f64,
    pub end_y: f64,
}

/// One side of the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Top,
    Right,
    Bottom,
    Left,
}

/// Independently resolved world edges.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Edges {
    pub top: Option<f64>,
    pub right: Option<f64>,
    pub bottom: Option<f64>,
    pub left: Option<f64>,
}

impl Edges {
    pub fn all_resolved(&self) -> bool {
        self.top.is_some() && self.right.is_some() && self.bottom.is_some() && self.left.is_some()
    }

    pub fn get(&self, edge: Edge) -> Option<f64> {
        match edge {
            Edge::Top => self.top,
            Edge::Right => self.right,
            Edge::Bottom => self.bottom,
            Edge::Left => self.left,
        }
    }
}

/// Latest viewport and its derived values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub start: [f64; 2],
    pub end: [f64; 2],
    pub center: [f64; 2],
    /// Absolute size per axis.
    pub extent: [f64; 2],
}

impl Viewport {
    fn from_border(border: &Border) -> Self {
        Self {
            start: [border.start_x, border.start_y],
            end: [border.end_x, border.end_y],
            center: [
                (border.start_x + border.end_x) / 2.0,
                (border.start_y + border.end_y) / 2.0,
            ],
            extent: [
                (border.start_x - border.end_x).abs(),
                (border.start_y - border.end_y).abs(),
            ],
        }
    }

    /// Square viewport of `size` centred on the origin.
    fn centered(size: f64) -> Self {
        let half = size / 2.0;
        Self::from_border(&Border {
            start_x: -half,
            start_y: -half,
            end_x: half,
            end_y: half,
        })
    }
}

/// Mapping from world coordinates to a full-map view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldMapping {
    pub offset_x: f64,
    pub offset_y: f64,
    pub map_size_x: f64,
    pub map_size_y: f64,
}

/// Boundary inference state for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryState {
    viewport: Viewport,
    edges: Edges,
    /// Per-axis size measured from two opposite edges, once known.
    measured_size: [Option<f64>; 2],
    offset: [Option<f64>; 2],
    default_size: f64,
}

impl Default for BoundaryState {
    fn default() -> Self {
        Self::new(DEFAULT_WORLD_SIZE)
    }
}

impl BoundaryState {
    /// Unresolved state. The viewport starts as a `default_world_size` square
    /// centred on the origin.
    pub fn new(default_world_size: f64) -> Self {
        Self {
            viewport: Viewport::centered(default_world_size),
            edges: Edges::default(),
            measured_size: [None, None],
            offset: [None, None],
            default_size: default_world_size,
        }
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn edges(&self) -> &Edges {
        &self.edges
    }

    /// Record a border observation and try to resolve the remaining edges
    /// against `reference` (the largest owned entity's position).
    ///
    /// Returns the edges resolved by this call.
    pub fn observe(&mut self, border: &Border, reference: Option<[f64; 2]>) -> Vec<Edge> {
        self.viewport = Viewport::from_border(border);

        if self.edges.all_resolved() {
            return Vec::new();
        }
        let Some([ref_x, ref_y]) = reference else {
            tracing::trace!("no owned entity to infer edges from");
            return Vec::new();
        };

        let [center_x, center_y] = self.viewport.center;
        let mut resolved = Vec::new();

        if self.edges.top.is_none() && near_edge(border.start_y, center_y, ref_y) {
            self.edges.top = Some(border.start_y);
            resolved.push(Edge::Top);
        }
        if self.edges.right.is_none() && near_edge(border.end_x, center_x, ref_x) {
            self.edges.right = Some(border.end_x);
            resolved.push(Edge::Right);
        }
        if self.edges.bottom.is_none() && near_edge(border.end_y, center_y, ref_y) {
            self.edges.bottom = Some(border.end_y);
            resolved.push(Edge::Bottom);
        }
        if self.edges.left.is_none() && near_edge(border.start_x, center_x, ref_x) {
            self.edges.left = Some(border.start_x);
            resolved.push(Edge::Left);
        }

        if !resolved.is_empty() {
            for edge in &resolved {
                tracing::info!(edge = ?edge, value = ?self.edges.get(*edge), "world edge resolved");
            }
            self.refresh_mapping();
        }
        resolved
    }

    /// Size used for an axis: its own measurement, else the other axis's
    /// measurement, else the default world size.
    fn best_size(&self, axis: usize) -> f64 {
        self.measured_size[axis]
            .or(self.measured_size[1 - axis])
            .unwrap_or(self.default_size)
    }

    fn refresh_mapping(&mut self) {
        let axes = [
            (self.edges.left, self.edges.right),
            (self.edges.top, self.edges.bottom),
        ];
        for (axis, (near, far)) in axes.into_iter().enumerate() {
            if let (Some(near), Some(far)) = (near, far) {
                self.measured_size[axis] = Some((far - near).abs());
            }
        }
        for (axis, (near, far)) in axes.into_iter().enumerate() {
            let half = self.best_size(axis) / 2.0;
            self.offset[axis] = near.map(|n| n + half).or(far.map(|f| f - half));
        }
    }

    /// Full-map mapping, available once at least one edge per axis is known.
    pub fn world_mapping(&self) -> Option<WorldMapping> {
        let [Some(offset_x), Some(offset_y)] = self.offset else {
            return None;
        };
        Some(WorldMapping {
            offset_x,
            offset_y,
            map_size_x: self.best_size(0),
            map_size_y: self.best_size(1),
        })
    }

    /// Map a world position to `[0, 1]` minimap coordinates: relative to the
    /// whole world when the mapping is known, else relative to the viewport.
    pub fn normalize(&self, x: f64, y: f64) -> [f64; 2] {
        match self.world_mapping() {
            Some(m) => [
                ratio(x - m.offset_x, m.map_size_x) + 0.5,
                ratio(y - m.offset_y, m.map_size_y) + 0.5,
            ],
            None => [
                ratio(x - self.viewport.start[0], self.viewport.extent[0]),
                ratio(y - self.viewport.start[1], self.viewport.extent[1]),
            ],
        }
    }

    /// Scale a radius the same way [`normalize`](Self::normalize) scales the
    /// x axis.
    pub fn normalize_size(&self, size: f64) -> f64 {
        match self.world_mapping() {
            Some(m) => ratio(size, m.map_size_x),
            None => ratio(size, self.viewport.extent[0]),
        }
    }
}

/// Strictly closer to the edge than to the centre.
fn near_edge(edge: f64, center: f64, point: f64) -> bool {
    (point - edge).abs() < (point - center).abs()
}

fn ratio(value: f64, extent: f64) -> f64 {
    if extent > 0.0 { value / extent } else { 0.0 }
}
