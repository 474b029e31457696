//! Waypoint graph collaborator and route geometry construction.

use super::geometry::{cubic_bezier, quadratic_bezier, Envelope, PathGeometry, Point};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of a point on a map's fixed graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Waypoint {
    pub map_id: i32,
    pub id: i32,
}

impl Waypoint {
    pub const fn new(map_id: i32, id: i32) -> Self {
        Self { map_id, id }
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.map_id, self.id)
    }
}

/// Declared curvature of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveType {
    #[default]
    Straight,
    QuadraticBezier,
    CubicBezier,
    /// Lateral (crab) moves follow the same shapes
    LateralStraight,
    LateralQuadratic,
    LateralCubic,
}

impl CurveType {
    /// Unknown codes fall back to straight.
    pub fn from_code(code: i32) -> CurveType {
        match code {
            2 => CurveType::QuadraticBezier,
            3 => CurveType::CubicBezier,
            4 => CurveType::LateralStraight,
            5 => CurveType::LateralQuadratic,
            6 => CurveType::LateralCubic,
            _ => CurveType::Straight,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            CurveType::Straight => 1,
            CurveType::QuadraticBezier => 2,
            CurveType::CubicBezier => 3,
            CurveType::LateralStraight => 4,
            CurveType::LateralQuadratic => 5,
            CurveType::LateralCubic => 6,
        }
    }

    fn order(&self) -> u8 {
        match self {
            CurveType::Straight | CurveType::LateralStraight => 1,
            CurveType::QuadraticBezier | CurveType::LateralQuadratic => 2,
            CurveType::CubicBezier | CurveType::LateralCubic => 3,
        }
    }
}

/// Directed edge between two waypoints
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Edge {
    pub curve: CurveType,
    pub ctl1: Option<Point>,
    pub ctl2: Option<Point>,
    /// Declared travel distance; zero means "measure the shape"
    #[serde(default)]
    pub distance: f64,
}

impl Edge {
    pub fn straight() -> Self {
        Self::default()
    }

    pub fn quadratic(ctl: Point) -> Self {
        Self {
            curve: CurveType::QuadraticBezier,
            ctl1: Some(ctl),
            ..Self::default()
        }
    }

    pub fn cubic(ctl1: Point, ctl2: Point) -> Self {
        Self {
            curve: CurveType::CubicBezier,
            ctl1: Some(ctl1),
            ctl2: Some(ctl2),
            ..Self::default()
        }
    }

    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = distance;
        self
    }

    /// Control points that actually shape the edge
    pub fn control_points(&self) -> Vec<Point> {
        match (self.curve.order(), self.ctl1, self.ctl2) {
            (2, Some(c1), _) => vec![c1],
            (3, Some(c1), Some(c2)) => vec![c1, c2],
            _ => Vec::new(),
        }
    }

    /// Polyline from `start` to `end`; missing control points degrade to a straight line.
    pub fn polyline(&self, start: Point, end: Point) -> Vec<Point> {
        match (self.curve.order(), self.ctl1, self.ctl2) {
            (2, Some(c1), _) => quadratic_bezier(start, c1, end),
            (3, Some(c1), Some(c2)) => cubic_bezier(start, c1, c2, end),
            _ => vec![start, end],
        }
    }
}

/// Edge lookup collaborator over the facility's point graph
pub trait RoadNetwork: Send + Sync {
    fn position(&self, waypoint: &Waypoint) -> Option<Point>;

    fn edge(&self, from: &Waypoint, to: &Waypoint) -> Option<Edge>;

    /// Parking points used by the recent-park allocation mode
    fn standby_points(&self, _map_id: i32) -> Vec<Waypoint> {
        Vec::new()
    }
}

/// In-memory point graph
#[derive(Debug, Clone, Default)]
pub struct MapGraph {
    points: HashMap<Waypoint, Point>,
    edges: HashMap<(Waypoint, Waypoint), Edge>,
    standby: HashMap<i32, Vec<Waypoint>>,
}

impl MapGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rectangular lattice with straight two-way edges.
    ///
    /// Point ids run row-major from 1; point `(col, row)` sits at
    /// `(col * spacing, row * spacing)`.
    pub fn grid(map_id: i32, cols: i32, rows: i32, spacing: f64) -> Self {
        let mut graph = Self::new();
        let id = |col: i32, row: i32| Waypoint::new(map_id, row * cols + col + 1);
        for row in 0..rows {
            for col in 0..cols {
                graph.add_point(
                    id(col, row),
                    Point::new(col as f64 * spacing, row as f64 * spacing),
                );
                if col > 0 {
                    graph.add_two_way_edge(id(col - 1, row), id(col, row), Edge::straight());
                }
                if row > 0 {
                    graph.add_two_way_edge(id(col, row - 1), id(col, row), Edge::straight());
                }
            }
        }
        graph
    }

    pub fn add_point(&mut self, waypoint: Waypoint, position: Point) -> &mut Self {
        self.points.insert(waypoint, position);
        self
    }

    pub fn add_edge(&mut self, from: Waypoint, to: Waypoint, edge: Edge) -> &mut Self {
        self.edges.insert((from, to), edge);
        self
    }

    /// The reverse direction swaps the control points.
    pub fn add_two_way_edge(&mut self, a: Waypoint, b: Waypoint, edge: Edge) -> &mut Self {
        let reverse = Edge {
            ctl1: if edge.ctl2.is_some() { edge.ctl2 } else { edge.ctl1 },
            ctl2: if edge.ctl2.is_some() { edge.ctl1 } else { None },
            ..edge.clone()
        };
        self.edges.insert((a, b), edge);
        self.edges.insert((b, a), reverse);
        self
    }

    pub fn add_standby_point(&mut self, waypoint: Waypoint) -> &mut Self {
        self.standby.entry(waypoint.map_id).or_default().push(waypoint);
        self
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn waypoints(&self, map_id: i32) -> Vec<Waypoint> {
        let mut ids: Vec<Waypoint> = self
            .points
            .keys()
            .filter(|w| w.map_id == map_id)
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Direct neighbours reachable over one edge
    pub fn neighbours(&self, waypoint: &Waypoint) -> Vec<Waypoint> {
        let mut out: Vec<Waypoint> = self
            .edges
            .keys()
            .filter(|(from, _)| from == waypoint)
            .map(|(_, to)| *to)
            .collect();
        out.sort();
        out
    }
}

impl RoadNetwork for MapGraph {
    fn position(&self, waypoint: &Waypoint) -> Option<Point> {
        self.points.get(waypoint).copied()
    }

    fn edge(&self, from: &Waypoint, to: &Waypoint) -> Option<Edge> {
        self.edges.get(&(*from, *to)).cloned()
    }

    fn standby_points(&self, map_id: i32) -> Vec<Waypoint> {
        self.standby.get(&map_id).cloned().unwrap_or_default()
    }
}

/// Skeleton of a route following each edge's declared curvature.
///
/// Returns `None` for an empty route or when any waypoint has no position.
pub fn build_path_geometry(route: &[Waypoint], network: &dyn RoadNetwork) -> Option<PathGeometry> {
    match route {
        [] => None,
        [only] => network.position(only).map(PathGeometry::point),
        _ => {
            let positions = resolve(route, network)?;
            let parts = route
                .windows(2)
                .zip(positions.windows(2))
                .map(|(ids, pts)| match network.edge(&ids[0], &ids[1]) {
                    Some(edge) => edge.polyline(pts[0], pts[1]),
                    None => vec![pts[0], pts[1]],
                })
                .collect();
            PathGeometry::from_parts(parts)
        }
    }
}

/// Travel length of a route; unresolved waypoints contribute nothing.
pub fn path_length(route: &[Waypoint], network: &dyn RoadNetwork) -> f64 {
    route
        .windows(2)
        .map(|pair| {
            let edge = network.edge(&pair[0], &pair[1]);
            if let Some(declared) = edge.as_ref().map(|e| e.distance).filter(|d| *d > 0.0) {
                return declared;
            }
            match (network.position(&pair[0]), network.position(&pair[1])) {
                (Some(a), Some(b)) => {
                    let line = edge.unwrap_or_default().polyline(a, b);
                    line.windows(2).map(|w| w[0].distance(&w[1])).sum()
                }
                _ => 0.0,
            }
        })
        .sum()
}

/// Box around a route including curve control points, grown by `tolerance`.
pub fn path_bounding_box(
    route: &[Waypoint],
    tolerance: f64,
    network: &dyn RoadNetwork,
) -> Option<Envelope> {
    let positions = resolve(route, network)?;
    let mut envelope = Envelope::of_point(*positions.first()?);
    for p in &positions {
        envelope.expand_to_include(p);
    }
    for pair in route.windows(2) {
        if let Some(edge) = network.edge(&pair[0], &pair[1]) {
            for ctl in edge.control_points() {
                envelope.expand_to_include(&ctl);
            }
        }
    }
    Some(envelope.expand_by(tolerance))
}

/// True when `point` lies within `tolerance` of the route skeleton.
pub fn is_point_within_path_tolerance(
    route: &[Waypoint],
    tolerance: f64,
    point: &Point,
    network: &dyn RoadNetwork,
) -> bool {
    let Some(bbox) = path_bounding_box(route, tolerance, network) else {
        return false;
    };
    if !bbox.contains_point(point) {
        return false;
    }
    build_path_geometry(route, network)
        .map(|g| g.distance_to_point(point) <= tolerance)
        .unwrap_or(false)
}

fn resolve(route: &[Waypoint], network: &dyn RoadNetwork) -> Option<Vec<Point>> {
    route.iter().map(|w| network.position(w)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(id: i32) -> Waypoint {
        Waypoint::new(1, id)
    }

    #[test]
    fn test_grid_layout() {
        let graph = MapGraph::grid(1, 3, 2, 1000.0);
        assert_eq!(graph.point_count(), 6);
        assert_eq!(graph.position(&wp(1)), Some(Point::new(0.0, 0.0)));
        assert_eq!(graph.position(&wp(6)), Some(Point::new(2000.0, 1000.0)));
        assert_eq!(graph.neighbours(&wp(2)), vec![wp(1), wp(3), wp(5)]);
    }

    #[test]
    fn test_build_geometry_straight_and_single_point() {
        let graph = MapGraph::grid(1, 3, 1, 1000.0);
        let single = build_path_geometry(&[wp(2)], &graph).unwrap();
        assert_eq!(single.envelope(), Envelope::of_point(Point::new(1000.0, 0.0)));

        let line = build_path_geometry(&[wp(1), wp(2), wp(3)], &graph).unwrap();
        assert_eq!(line.parts().len(), 2);
        assert!((line.length() - 2000.0).abs() < 1e-9);

        assert!(build_path_geometry(&[], &graph).is_none());
        assert!(build_path_geometry(&[wp(1), wp(99)], &graph).is_none());
    }

    #[test]
    fn test_curved_edge_follows_control_point() {
        let mut graph = MapGraph::new();
        graph
            .add_point(wp(1), Point::new(0.0, 0.0))
            .add_point(wp(2), Point::new(2000.0, 0.0))
            .add_edge(wp(1), wp(2), Edge::quadratic(Point::new(1000.0, 1000.0)));

        let g = build_path_geometry(&[wp(1), wp(2)], &graph).unwrap();
        assert!((g.envelope().max_y - 500.0).abs() < 1e-9);

        // Control point widens the bounding box beyond the sampled curve
        let bbox = path_bounding_box(&[wp(1), wp(2)], 0.0, &graph).unwrap();
        assert_eq!(bbox.max_y, 1000.0);

        assert!(path_length(&[wp(1), wp(2)], &graph) > 2000.0);
    }

    #[test]
    fn test_declared_distance_wins() {
        let mut graph = MapGraph::new();
        graph
            .add_point(wp(1), Point::new(0.0, 0.0))
            .add_point(wp(2), Point::new(3.0, 4.0))
            .add_edge(wp(1), wp(2), Edge::straight().with_distance(42.0));
        assert_eq!(path_length(&[wp(1), wp(2)], &graph), 42.0);
        // No edge declared the other way: Euclidean fallback
        assert_eq!(path_length(&[wp(2), wp(1)], &graph), 5.0);
    }

    #[test]
    fn test_missing_control_point_degrades_to_straight() {
        let edge = Edge {
            curve: CurveType::from_code(3),
            ctl1: Some(Point::new(5.0, 5.0)),
            ctl2: None,
            distance: 0.0,
        };
        let line = edge.polyline(Point::new(0.0, 0.0), Point::new(10.0, 0.0));
        assert_eq!(line.len(), 2);
        assert_eq!(CurveType::from_code(42), CurveType::Straight);
    }

    #[test]
    fn test_point_within_tolerance() {
        let graph = MapGraph::grid(1, 3, 1, 1000.0);
        let route = [wp(1), wp(2), wp(3)];
        assert!(is_point_within_path_tolerance(
            &route,
            100.0,
            &Point::new(1500.0, 80.0),
            &graph
        ));
        assert!(!is_point_within_path_tolerance(
            &route,
            100.0,
            &Point::new(1500.0, 150.0),
            &graph
        ));
    }
}
