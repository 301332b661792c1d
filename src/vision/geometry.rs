//! Geometry helpers shared by fusion, detection and OCR postprocessing

use imageproc::point::Point;

use super::Quad;

/// Center of a quad, taken from corners 0 and 2
pub fn center(quad: &Quad) -> (f32, f32) {
    (
        (quad[0].0 + quad[2].0) / 2.0,
        (quad[0].1 + quad[2].1) / 2.0,
    )
}

/// Vertical extent between corners 0 and 2
pub fn height(quad: &Quad) -> f32 {
    (quad[2].1 - quad[0].1).abs()
}

/// Horizontal extent of the top edge
pub fn width(quad: &Quad) -> f32 {
    (quad[1].0 - quad[0].0).abs()
}

/// Rightmost x of the right edge (corners 1 and 2)
pub fn right_edge(quad: &Quad) -> f32 {
    quad[1].0.max(quad[2].0)
}

/// Leftmost x of the left edge (corners 0 and 3)
pub fn left_edge(quad: &Quad) -> f32 {
    quad[0].0.min(quad[3].0)
}

/// Smallest x over all four corners
pub fn leftmost_x(quad: &Quad) -> f32 {
    quad.iter().map(|p| p.0).fold(f32::INFINITY, f32::min)
}

/// Whether two vertical centers lie on the same text line
pub fn same_line(a: &Quad, b: &Quad, line_height: f32) -> bool {
    (center(a).1 - center(b).1).abs() <= 0.8 * line_height
}

/// Shift every corner by (dx, dy)
pub fn translate(quad: &Quad, dx: f32, dy: f32) -> Quad {
    quad.map(|(x, y)| (x + dx, y + dy))
}

/// Inclusive pixel bounding rectangle of integer points as (x, y, width, height)
pub fn bounding_rect(points: &[Point<i32>]) -> (u32, u32, u32, u32) {
    if points.is_empty() {
        return (0, 0, 0, 0);
    }

    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0);
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0);
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0);
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0);

    (
        min_x.max(0) as u32,
        min_y.max(0) as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    )
}

/// Douglas-Peucker approximation of a closed polygon
///
/// The ring is split at the vertex farthest from the first one and each half
/// is simplified as an open chain, so the first vertex is always kept.
pub fn approximate_polygon(points: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let origin = points[0];
    let far = (1..points.len())
        .max_by(|&a, &b| distance(origin, points[a]).total_cmp(&distance(origin, points[b])))
        .unwrap_or(1);

    let mut closing: Vec<Point<i32>> = points[far..].to_vec();
    closing.push(origin);

    let mut result = simplify_open(&points[..=far], epsilon);
    result.pop();
    result.extend(simplify_open(&closing, epsilon));
    result.pop();
    result
}

/// Douglas-Peucker over an open chain, keeping both endpoints
fn simplify_open(chain: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    let last = chain.len() - 1;
    if last < 2 {
        return chain.to_vec();
    }

    let (index, max_distance) = (1..last)
        .map(|i| (i, segment_distance(chain[i], chain[0], chain[last])))
        .fold((0, 0.0), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        });

    if max_distance > epsilon {
        let mut head = simplify_open(&chain[..=index], epsilon);
        head.pop();
        head.extend(simplify_open(&chain[index..], epsilon));
        head
    } else {
        vec![chain[0], chain[last]]
    }
}

/// Distance from `p` to the line through `a` and `b`
fn segment_distance(p: Point<i32>, a: Point<i32>, b: Point<i32>) -> f64 {
    let (dx, dy) = ((b.x - a.x) as f64, (b.y - a.y) as f64);
    let length = dx.hypot(dy);
    if length == 0.0 {
        return distance(p, a);
    }
    ((p.x - a.x) as f64 * dy - (p.y - a.y) as f64 * dx).abs() / length
}

fn distance(a: Point<i32>, b: Point<i32>) -> f64 {
    ((b.x - a.x) as f64).hypot((b.y - a.y) as f64)
}

/// Drop the interior points of straight runs in a pixel chain, keeping corners
pub fn simplify_chain(points: &[Point<i32>]) -> Vec<Point<i32>> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }

    let direction = |a: Point<i32>, b: Point<i32>| ((b.x - a.x).signum(), (b.y - a.y).signum());

    (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            direction(prev, points[i]) != direction(points[i], next)
        })
        .map(|i| points[i])
        .collect()
}

/// Order four corners as top-left, top-right, bottom-right, bottom-left
pub fn order_corners(points: [(f32, f32); 4]) -> Quad {
    let by = |key: fn(&(f32, f32)) -> f32, max: bool| {
        let mut best = points[0];
        for p in &points[1..] {
            if (max && key(p) > key(&best)) || (!max && key(p) < key(&best)) {
                best = *p;
            }
        }
        best
    };

    [
        by(|p| p.0 + p.1, false),
        by(|p| p.1 - p.0, false),
        by(|p| p.0 + p.1, true),
        by(|p| p.1 - p.0, true),
    ]
}

/// Convex hull in counter-clockwise order (monotone chain)
fn convex_hull(points: &[(f32, f32)]) -> Vec<(f32, f32)> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    let cross = |o: (f32, f32), a: (f32, f32), b: (f32, f32)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut hull: Vec<(f32, f32)> = Vec::with_capacity(sorted.len() * 2);
    for pass in [sorted.clone(), sorted.iter().rev().copied().collect()] {
        let floor = hull.len();
        for p in pass {
            while hull.len() >= floor + 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
                hull.pop();
            }
            hull.push(p);
        }
        hull.pop();
    }
    hull
}

/// Minimum-area enclosing rectangle, corners in traversal order
///
/// Returns `None` when the points are collinear or fewer than three.
pub fn min_area_rect(points: &[(f32, f32)]) -> Option<Quad> {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return None;
    }

    let mut best: Option<(f32, Quad)> = None;
    for i in 0..hull.len() {
        let p1 = hull[i];
        let p2 = hull[(i + 1) % hull.len()];
        let (ex, ey) = (p2.0 - p1.0, p2.1 - p1.1);
        let length = ex.hypot(ey);
        if length < 1e-6 {
            continue;
        }
        let (ux, uy) = (ex / length, ey / length);
        let (vx, vy) = (-uy, ux);

        let (mut min_u, mut max_u, mut min_v, mut max_v) = (f32::MAX, f32::MIN, f32::MAX, f32::MIN);
        for &(x, y) in &hull {
            let (dx, dy) = (x - p1.0, y - p1.1);
            let u = dx * ux + dy * uy;
            let v = dx * vx + dy * vy;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }

        let area = (max_u - min_u) * (max_v - min_v);
        if best.as_ref().is_some_and(|(best_area, _)| *best_area <= area) {
            continue;
        }

        let corner = |u: f32, v: f32| (p1.0 + u * ux + v * vx, p1.1 + u * uy + v * vy);
        best = Some((
            area,
            [
                corner(min_u, min_v),
                corner(max_u, min_v),
                corner(max_u, max_v),
                corner(min_u, max_v),
            ],
        ));
    }

    best.map(|(_, rect)| rect)
}

/// Lengths of the two sides of a rectangle given in traversal order
pub fn rect_sides(rect: &Quad) -> (f32, f32) {
    let side = |a: (f32, f32), b: (f32, f32)| (b.0 - a.0).hypot(b.1 - a.1);
    (side(rect[0], rect[1]), side(rect[1], rect[2]))
}

/// Grow a rectangle outwards by `area * ratio / perimeter` on every side
pub fn unclip(rect: &Quad, ratio: f32) -> Quad {
    let (a, b) = rect_sides(rect);
    let perimeter = 2.0 * (a + b);
    if perimeter <= 0.0 {
        return *rect;
    }
    let offset = a * b * ratio / perimeter;

    let (cx, cy) = ((rect[0].0 + rect[2].0) / 2.0, (rect[0].1 + rect[2].1) / 2.0);
    let unit = |from: (f32, f32), to: (f32, f32), len: f32| {
        if len > 0.0 {
            ((to.0 - from.0) / len, (to.1 - from.1) / len)
        } else {
            (0.0, 0.0)
        }
    };
    let u = unit(rect[0], rect[1], a);
    let v = unit(rect[1], rect[2], b);
    let (hu, hv) = (a / 2.0 + offset, b / 2.0 + offset);

    let corner = |su: f32, sv: f32| {
        (
            cx + su * hu * u.0 + sv * hv * v.0,
            cy + su * hu * u.1 + sv * hv * v.1,
        )
    };
    [
        corner(-1.0, -1.0),
        corner(1.0, -1.0),
        corner(1.0, 1.0),
        corner(-1.0, 1.0),
    ]
}
