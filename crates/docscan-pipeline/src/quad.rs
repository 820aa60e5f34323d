//! Quadrilateral selection and corner ordering.
//!
//! Each contour is approximated by a polygon at a tolerance proportional
//! to its perimeter. Polygons with exactly four vertices become
//! candidates if they cover enough of the frame and have a plausible
//! page aspect ratio. The candidate covering the largest share of the
//! frame wins; on equal coverage the first one encountered is kept.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::simplify::approximate_closed;
use crate::types::{Contour, OrderedQuad, Point, QuadCriteria};

/// Approximation tolerance as a fraction of the contour perimeter.
pub const APPROX_EPSILON_RATIO: f64 = 0.02;

/// A four-vertex polygon that passed every acceptance test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropCandidate {
    /// The polygon vertices in approximation order.
    pub vertices: [Point; 4],
    /// The same vertices in canonical corner order.
    pub quad: OrderedQuad,
    /// Polygon area divided by frame area.
    pub area_ratio: f64,
    /// `max_width / max_height` of the ordered quad.
    pub aspect: f64,
}

impl CropCandidate {
    /// Ranking score. Larger is better.
    #[must_use]
    pub const fn score(&self) -> f64 {
        self.area_ratio
    }
}

/// Counts describing one selection pass, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionStats {
    /// Contours examined.
    pub contours: usize,
    /// Contours whose approximation had exactly four vertices.
    pub quads: usize,
    /// Quads that passed the area and aspect tests.
    pub candidates: usize,
}

/// Assign the four points to corner roles.
///
/// `tl` minimizes `x + y`, `br` maximizes it; `tr` minimizes `y - x`,
/// `bl` maximizes it. On ties the earliest point in the input wins.
/// Pathological quads (self-intersecting, rotated near 45°) may give two
/// roles the same point; that is accepted rather than corrected.
#[must_use]
pub fn order_quad(points: [Point; 4]) -> OrderedQuad {
    let sum = points.map(|p| p.x + p.y);
    let diff = points.map(|p| p.y - p.x);
    OrderedQuad {
        tl: points[arg_by(&sum, |a, b| a < b)],
        tr: points[arg_by(&diff, |a, b| a < b)],
        br: points[arg_by(&sum, |a, b| a > b)],
        bl: points[arg_by(&diff, |a, b| a > b)],
    }
}

/// Index of the first element that `better` prefers over all earlier ones.
fn arg_by(values: &[f64; 4], better: impl Fn(f64, f64) -> bool) -> usize {
    let mut best = 0;
    for i in 1..values.len() {
        if better(values[i], values[best]) {
            best = i;
        }
    }
    best
}

/// Score one contour against the acceptance criteria.
///
/// Returns `None` when the contour's approximation is not a
/// quadrilateral or fails any test. Both ends of every range are
/// inclusive.
#[must_use]
pub fn evaluate(contour: &Contour, image_area: f64, criteria: &QuadCriteria) -> Option<CropCandidate> {
    score_polygon(&approximate(contour), image_area, criteria)
}

fn approximate(contour: &Contour) -> Contour {
    approximate_closed(contour, APPROX_EPSILON_RATIO * contour.perimeter())
}

fn score_polygon(polygon: &Contour, image_area: f64, criteria: &QuadCriteria) -> Option<CropCandidate> {
    let vertices: [Point; 4] = polygon.points().try_into().ok()?;

    let area_ratio = polygon.area() / image_area;
    if !area_ratio.is_finite() || area_ratio < criteria.min_area_ratio {
        return None;
    }

    let quad = order_quad(vertices);
    let (max_w, max_h) = (quad.max_width(), quad.max_height());
    if !max_w.is_finite() || !max_h.is_finite() || max_w < 1.0 || max_h < 1.0 {
        return None;
    }

    let aspect = max_w / max_h;
    if aspect < criteria.aspect_min || aspect > criteria.aspect_max {
        return None;
    }

    Some(CropCandidate {
        vertices,
        quad,
        area_ratio,
        aspect,
    })
}

/// Pick the best document candidate among `contours`.
///
/// `None` means no contour qualified; callers fall back to the full
/// frame. This is never an error.
#[must_use]
pub fn select_best_quad(
    contours: &[Contour],
    image_area: f64,
    criteria: &QuadCriteria,
) -> Option<CropCandidate> {
    select_with_stats(contours, image_area, criteria).0
}

/// [`select_best_quad`] plus counts of what each filter let through.
#[must_use]
pub fn select_with_stats(
    contours: &[Contour],
    image_area: f64,
    criteria: &QuadCriteria,
) -> (Option<CropCandidate>, SelectionStats) {
    let mut stats = SelectionStats {
        contours: contours.len(),
        ..SelectionStats::default()
    };
    let mut best: Option<CropCandidate> = None;

    for contour in contours {
        let polygon = approximate(contour);
        if polygon.len() != 4 {
            continue;
        }
        stats.quads += 1;

        let Some(candidate) = score_polygon(&polygon, image_area, criteria) else {
            continue;
        };
        stats.candidates += 1;
        trace!(
            area_ratio = candidate.area_ratio,
            aspect = candidate.aspect,
            "quad candidate"
        );

        if best.is_none_or(|b| candidate.score() > b.score()) {
            best = Some(candidate);
        }
    }

    (best, stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::simplify::tests::rectangle_border;

    fn corners(pts: [(f64, f64); 4]) -> [Point; 4] {
        pts.map(|(x, y)| Point::new(x, y))
    }

    fn polygon(pts: [(f64, f64); 4]) -> Contour {
        Contour::new(corners(pts).to_vec())
    }

    // --- order_quad ---

    #[test]
    fn orders_shuffled_rectangle() {
        let q = order_quad(corners([(60.0, 50.0), (10.0, 10.0), (10.0, 50.0), (60.0, 10.0)]));
        assert_eq!(q.tl, Point::new(10.0, 10.0));
        assert_eq!(q.tr, Point::new(60.0, 10.0));
        assert_eq!(q.br, Point::new(60.0, 50.0));
        assert_eq!(q.bl, Point::new(10.0, 50.0));
    }

    #[test]
    fn ordering_is_idempotent() {
        let raw = corners([(12.0, 95.0), (7.0, 3.0), (88.0, 90.0), (101.0, 8.0)]);
        let once = order_quad(raw);
        let twice = order_quad(once.corners());
        assert_eq!(once, twice);
    }

    #[test]
    fn ties_pick_first_index() {
        // A diamond: every role has two equally good points.
        let raw = corners([(10.0, 0.0), (20.0, 10.0), (10.0, 20.0), (0.0, 10.0)]);
        let q = order_quad(raw);
        // x + y: 10, 30, 30, 10 -> tl is index 0, br is index 1.
        assert_eq!(q.tl, raw[0]);
        assert_eq!(q.br, raw[1]);
        // y - x: -10, -10, 10, 10 -> tr is index 0, bl is index 2.
        assert_eq!(q.tr, raw[0]);
        assert_eq!(q.bl, raw[2]);
    }

    // --- evaluate ---

    #[test]
    fn area_ratio_boundary_is_inclusive() {
        // 50x40 rectangle: area 2000.
        let rect = polygon([(10.0, 10.0), (60.0, 10.0), (60.0, 50.0), (10.0, 50.0)]);
        let criteria = QuadCriteria::default();

        let exact = evaluate(&rect, 10_000.0, &criteria);
        assert!(exact.is_some(), "ratio exactly 0.20 must be accepted");
        assert!((exact.map_or(0.0, |c| c.area_ratio) - 0.2).abs() < 1e-12);

        let just_below = evaluate(&rect, 2000.0 / 0.1999, &criteria);
        assert!(just_below.is_none(), "ratio 0.1999 must be rejected");
    }

    #[test]
    fn aspect_bounds_are_enforced() {
        let criteria = QuadCriteria {
            min_area_ratio: 0.0,
            ..QuadCriteria::default()
        };
        // 100x20 banner: aspect 5.
        let banner = polygon([(0.0, 0.0), (100.0, 0.0), (100.0, 20.0), (0.0, 20.0)]);
        assert!(evaluate(&banner, 1e6, &criteria).is_none());
        // 44x20: aspect exactly 2.2 is inclusive.
        let edge = polygon([(0.0, 0.0), (44.0, 0.0), (44.0, 20.0), (0.0, 20.0)]);
        assert!(evaluate(&edge, 1e6, &criteria).is_some());
        // 20x40: aspect exactly 0.5.
        let tall = polygon([(0.0, 0.0), (20.0, 0.0), (20.0, 40.0), (0.0, 40.0)]);
        assert!(evaluate(&tall, 1e6, &criteria).is_some());
    }

    #[test]
    fn non_quadrilaterals_are_rejected() {
        let triangle = Contour::new(vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(50.0, 80.0),
        ]);
        assert!(evaluate(&triangle, 10_000.0, &QuadCriteria::default()).is_none());
    }

    #[test]
    fn half_frame_rectangle_scores_half() {
        // 200x140 frame, rectangle (30,20)-(170,120): 140x100, aspect 1.4.
        let image_area = 200.0 * 140.0;
        for contour in [
            polygon([(30.0, 20.0), (170.0, 20.0), (170.0, 120.0), (30.0, 120.0)]),
            rectangle_border(30, 20, 170, 120),
        ] {
            let c = evaluate(&contour, image_area, &QuadCriteria::default()).unwrap();
            assert!((c.area_ratio - 0.5).abs() < 1e-9);
            assert!((c.aspect - 1.4).abs() < 1e-9);
            assert_eq!(c.quad.tl, Point::new(30.0, 20.0));
            assert_eq!(c.quad.br, Point::new(170.0, 120.0));
        }
    }

    // --- select_best_quad ---

    #[test]
    fn largest_candidate_wins() {
        let small = polygon([(10.0, 10.0), (60.0, 10.0), (60.0, 50.0), (10.0, 50.0)]);
        let large = polygon([(5.0, 5.0), (95.0, 5.0), (95.0, 85.0), (5.0, 85.0)]);
        let best = select_best_quad(&[small, large], 10_000.0, &QuadCriteria::default());
        assert_eq!(best.map(|c| c.quad.tl), Some(Point::new(5.0, 5.0)));
    }

    #[test]
    fn equal_scores_keep_first() {
        let first = polygon([(0.0, 0.0), (50.0, 0.0), (50.0, 40.0), (0.0, 40.0)]);
        let second = polygon([(50.0, 50.0), (100.0, 50.0), (100.0, 90.0), (50.0, 90.0)]);
        let (best, stats) =
            select_with_stats(&[first, second], 10_000.0, &QuadCriteria::default());
        assert_eq!(best.map(|c| c.quad.tl), Some(Point::new(0.0, 0.0)));
        assert_eq!(stats.quads, 2);
        assert_eq!(stats.candidates, 2);
    }

    #[test]
    fn nothing_qualifies_returns_none() {
        assert!(select_best_quad(&[], 100.0, &QuadCriteria::default()).is_none());
        let tiny = polygon([(0.0, 0.0), (5.0, 0.0), (5.0, 5.0), (0.0, 5.0)]);
        let (best, stats) = select_with_stats(&[tiny], 10_000.0, &QuadCriteria::default());
        assert!(best.is_none());
        assert_eq!(stats.contours, 1);
        assert_eq!(stats.quads, 1);
        assert_eq!(stats.candidates, 0);
    }
}
