//! Planar geometry for footprints, route skeletons and reserved corridors.
//!
//! Coordinates are millimetres in the facility frame.

use serde::{Deserialize, Serialize};

/// A position in the facility frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Build from two x and two y bounds in any order.
    pub fn new(x1: f64, x2: f64, y1: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            max_x: x1.max(x2),
            min_y: y1.min(y2),
            max_y: y1.max(y2),
        }
    }

    pub fn of_point(p: Point) -> Self {
        Self::new(p.x, p.x, p.y, p.y)
    }

    /// Square box of half-width `radius` centred on `p`
    pub fn around(p: Point, radius: f64) -> Self {
        Self::of_point(p).expand_by(radius)
    }

    pub fn centre(&self) -> Point {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        !(other.min_x > self.max_x
            || other.max_x < self.min_x
            || other.min_y > self.max_y
            || other.max_y < self.min_y)
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    pub fn expand_by(&self, distance: f64) -> Envelope {
        Envelope {
            min_x: self.min_x - distance,
            max_x: self.max_x + distance,
            min_y: self.min_y - distance,
            max_y: self.max_y + distance,
        }
    }

    pub fn expand_to_include(&mut self, p: &Point) {
        self.min_x = self.min_x.min(p.x);
        self.max_x = self.max_x.max(p.x);
        self.min_y = self.min_y.min(p.y);
        self.max_y = self.max_y.max(p.y);
    }

    pub fn merge(&self, other: &Envelope) -> Envelope {
        Envelope {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Route skeleton: one point, or one or more polylines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathGeometry {
    parts: Vec<Vec<Point>>,
    envelope: Envelope,
}

impl PathGeometry {
    pub fn point(p: Point) -> Self {
        Self {
            parts: vec![vec![p]],
            envelope: Envelope::of_point(p),
        }
    }

    /// Returns `None` when no part carries a coordinate.
    pub fn from_parts(parts: Vec<Vec<Point>>) -> Option<Self> {
        let parts: Vec<Vec<Point>> = parts.into_iter().filter(|p| !p.is_empty()).collect();
        let first = *parts.first()?.first()?;
        let mut envelope = Envelope::of_point(first);
        for p in parts.iter().flatten() {
            envelope.expand_to_include(p);
        }
        Some(Self { parts, envelope })
    }

    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    pub fn parts(&self) -> &[Vec<Point>] {
        &self.parts
    }

    /// Segments of every part; a lone point yields a degenerate segment.
    pub fn segments(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        self.parts.iter().flat_map(|part| {
            let degenerate = (part.len() == 1).then(|| (part[0], part[0]));
            degenerate
                .into_iter()
                .chain(part.windows(2).map(|w| (w[0], w[1])))
        })
    }

    pub fn length(&self) -> f64 {
        self.segments().map(|(a, b)| a.distance(&b)).sum()
    }

    pub fn distance_to_point(&self, p: &Point) -> f64 {
        self.segments()
            .map(|(a, b)| point_segment_distance(p, &a, &b))
            .fold(f64::INFINITY, f64::min)
    }

    /// Minimum distance between the two skeletons; zero when they cross.
    pub fn distance(&self, other: &PathGeometry) -> f64 {
        let mut best = f64::INFINITY;
        for (a, b) in self.segments() {
            for (c, d) in other.segments() {
                best = best.min(segment_distance(&a, &b, &c, &d));
                if best == 0.0 {
                    return 0.0;
                }
            }
        }
        best
    }
}

/// A skeleton inflated by a radius: the reserved safety corridor of a vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corridor {
    skeleton: PathGeometry,
    radius: f64,
}

impl Corridor {
    pub fn new(skeleton: PathGeometry, radius: f64) -> Self {
        Self {
            skeleton,
            radius: radius.max(0.0),
        }
    }

    pub fn skeleton(&self) -> &PathGeometry {
        &self.skeleton
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

/// Anything a route skeleton can be tested against
pub trait Shape {
    fn envelope(&self) -> Envelope;

    /// Distance from the boundary of this shape to `path` (zero on overlap).
    fn distance_to_path(&self, path: &PathGeometry) -> f64;
}

impl Shape for Point {
    fn envelope(&self) -> Envelope {
        Envelope::of_point(*self)
    }

    fn distance_to_path(&self, path: &PathGeometry) -> f64 {
        path.distance_to_point(self)
    }
}

impl Shape for PathGeometry {
    fn envelope(&self) -> Envelope {
        self.envelope
    }

    fn distance_to_path(&self, path: &PathGeometry) -> f64 {
        self.distance(path)
    }
}

impl Shape for Corridor {
    fn envelope(&self) -> Envelope {
        self.skeleton.envelope().expand_by(self.radius)
    }

    fn distance_to_path(&self, path: &PathGeometry) -> f64 {
        (self.skeleton.distance(path) - self.radius).max(0.0)
    }
}

/// True when `path` comes closer than `threshold` to `other`.
///
/// Boxes expanded by the threshold are compared first; the exact distance is
/// only computed for overlapping boxes.
pub fn check_collision<S: Shape + ?Sized>(path: &PathGeometry, other: &S, threshold: f64) -> bool {
    if !path
        .envelope()
        .expand_by(threshold)
        .intersects(&other.envelope())
    {
        return false;
    }
    other.distance_to_path(path) < threshold
}

fn bezier_segments(start: &Point, end: &Point) -> usize {
    ((start.distance(end) / 10.0) as usize).clamp(10, 100)
}

/// Flatten a quadratic Bézier into a polyline.
pub fn quadratic_bezier(p0: Point, c1: Point, p2: Point) -> Vec<Point> {
    let n = bezier_segments(&p0, &p2);
    (0..=n)
        .map(|i| {
            let t = i as f64 / n as f64;
            let mt = 1.0 - t;
            Point::new(
                mt * mt * p0.x + 2.0 * mt * t * c1.x + t * t * p2.x,
                mt * mt * p0.y + 2.0 * mt * t * c1.y + t * t * p2.y,
            )
        })
        .collect()
}

/// Flatten a cubic Bézier into a polyline.
pub fn cubic_bezier(p0: Point, c1: Point, c2: Point, p3: Point) -> Vec<Point> {
    let n = bezier_segments(&p0, &p3);
    (0..=n)
        .map(|i| {
            let t = i as f64 / n as f64;
            let mt = 1.0 - t;
            let (mt2, t2) = (mt * mt, t * t);
            Point::new(
                mt2 * mt * p0.x + 3.0 * mt2 * t * c1.x + 3.0 * mt * t2 * c2.x + t2 * t * p3.x,
                mt2 * mt * p0.y + 3.0 * mt2 * t * c1.y + 3.0 * mt * t2 * c2.y + t2 * t * p3.y,
            )
        })
        .collect()
}

pub fn point_segment_distance(p: &Point, a: &Point, b: &Point) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    p.distance(&Point::new(a.x + t * dx, a.y + t * dy))
}

fn orient(a: &Point, b: &Point, c: &Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn within_box(a: &Point, b: &Point, p: &Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_intersect(a: &Point, b: &Point, c: &Point, d: &Point) -> bool {
    let d1 = orient(c, d, a);
    let d2 = orient(c, d, b);
    let d3 = orient(a, b, c);
    let d4 = orient(a, b, d);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && within_box(c, d, a))
        || (d2 == 0.0 && within_box(c, d, b))
        || (d3 == 0.0 && within_box(a, b, c))
        || (d4 == 0.0 && within_box(a, b, d))
}

/// Distance between segments `ab` and `cd`.
pub fn segment_distance(a: &Point, b: &Point, c: &Point, d: &Point) -> f64 {
    if segments_intersect(a, b, c, d) {
        return 0.0;
    }
    point_segment_distance(a, c, d)
        .min(point_segment_distance(b, c, d))
        .min(point_segment_distance(c, a, b))
        .min(point_segment_distance(d, a, b))
}
