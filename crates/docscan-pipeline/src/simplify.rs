//! Closed-curve polygon approximation using Ramer-Douglas-Peucker.
//!
//! A traced contour has one point per boundary pixel. The quadrilateral
//! selector needs the handful of vertices that describe its shape, so
//! [`approximate_closed`] reduces it to a polygon whose edges stay within
//! `epsilon` pixels of the original curve.
//!
//! Closed curves have no natural endpoints. The curve is split at two
//! mutually distant points, each half is simplified as an open chain, and
//! a final pass drops any vertex lying within `epsilon` of the segment
//! joining its neighbours.

use crate::types::{Contour, Point};

/// Approximate a closed contour by a polygon with tolerance `epsilon`.
///
/// The polygon is closed implicitly (the last vertex connects to the
/// first). Contours with fewer than 3 points are returned unchanged.
/// A contour whose points all coincide collapses to a single vertex.
#[must_use = "returns the approximated polygon"]
pub fn approximate_closed(contour: &Contour, epsilon: f64) -> Contour {
    let points = contour.points();
    let n = points.len();
    if n < 3 {
        return contour.clone();
    }

    let a = farthest_from(points, points[0]);
    let b = farthest_from(points, points[a]);
    if points[a].distance_squared(points[b]) == 0.0 {
        return Contour::new(vec![points[a]]);
    }

    let forward = chain(points, a, b);
    let backward = chain(points, b, a);

    let mut vertices = simplify_chain(&forward, epsilon);
    vertices.pop();
    let mut rest = simplify_chain(&backward, epsilon);
    rest.pop();
    vertices.extend(rest);

    drop_flat_vertices(&mut vertices, epsilon);
    Contour::new(vertices)
}

/// Index of the point farthest from `origin`. Earlier indices win ties.
fn farthest_from(points: &[Point], origin: Point) -> usize {
    let mut best = 0;
    let mut best_dist = -1.0;
    for (i, &p) in points.iter().enumerate() {
        let d = p.distance_squared(origin);
        if d > best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

/// Points from index `from` to index `to` inclusive, wrapping around.
fn chain(points: &[Point], from: usize, to: usize) -> Vec<Point> {
    let n = points.len();
    let len = (to + n - from) % n + 1;
    (0..len).map(|k| points[(from + k) % n]).collect()
}

/// Open-chain RDP keeping both endpoints.
fn simplify_chain(points: &[Point], tolerance: f64) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut kept = vec![false; points.len()];
    kept[0] = true;
    kept[points.len() - 1] = true;

    rdp_recurse(points, 0, points.len() - 1, tolerance, &mut kept);

    points
        .iter()
        .zip(&kept)
        .filter(|&(_, k)| *k)
        .map(|(&p, _)| p)
        .collect()
}

/// Remove vertices that sit within `tolerance` of the line through their
/// neighbours, never going below a triangle.
fn drop_flat_vertices(vertices: &mut Vec<Point>, tolerance: f64) {
    let mut i = 0;
    while vertices.len() > 3 && i < vertices.len() {
        let len = vertices.len();
        let prev = vertices[(i + len - 1) % len];
        let next = vertices[(i + 1) % len];
        if perpendicular_distance(vertices[i], prev, next) <= tolerance {
            vertices.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Recursive step of the Ramer-Douglas-Peucker algorithm.
///
/// Finds the point between `start` and `end` that is farthest from the
/// line segment between them. If that distance exceeds `tolerance`, the
/// point is kept and both sub-segments are processed recursively.
fn rdp_recurse(points: &[Point], start: usize, end: usize, tolerance: f64, kept: &mut [bool]) {
    if end <= start + 1 {
        return;
    }

    let mut max_dist = 0.0;
    let mut max_idx = start;

    for i in (start + 1)..end {
        let d = perpendicular_distance(points[i], points[start], points[end]);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }

    if max_dist > tolerance {
        kept[max_idx] = true;
        rdp_recurse(points, start, max_idx, tolerance, kept);
        rdp_recurse(points, max_idx, end, tolerance, kept);
    }
}

/// Perpendicular distance from point `p` to the line defined by `a` and `b`.
///
/// Uses the formula: |cross(b-a, p-a)| / |b-a|.
/// When `a` and `b` coincide, returns the distance from `p` to `a`.
fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx.mul_add(dx, dy * dy);

    if length_sq == 0.0 {
        return p.distance(a);
    }

    let cross = dx.mul_add(a.y - p.y, -(dy * (a.x - p.x)));
    cross.abs() / length_sq.sqrt()
}
