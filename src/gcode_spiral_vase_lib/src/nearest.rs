use kiddo::{self, SquaredEuclidean};
use ordered_float::OrderedFloat;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::f32::consts::FRAC_1_SQRT_2;

use crate::geometry::{clamp_point_to_segment, Point};
use crate::{Mm, PointIndex};

type KdTree = kiddo::float::kdtree::KdTree<Mm, PointIndex, 2, 32, u32>;

// We split the previous layer's segments into sub-segments so that the KdTree can help us find
// long segments that happen to pass near the query point. Too small wastes memory without
// speeding anything up; too large means each query has to look at more candidate segments. A
// vase layer is usually a lot of short segments around curves plus a few long straight ones.
const MAX_SUBSEGMENT_LENGTH: Mm = 2.0;
// The KdTree complains if too many items have the "same position on one axis", which is exactly
// what a straight axis-aligned wall produces. Fudging each stored location slightly avoids that
// without bigger buckets. The points we actually hand back never have the fudge applied; only the
// search radius has to account for it.
const KD_TREE_FUDGE_RADIUS: Mm = 0.1;
// Square fudge per component, sized so the diagonal is KD_TREE_FUDGE_RADIUS.
const KD_TREE_FUDGE_PER_COMPONENT: Mm = KD_TREE_FUDGE_RADIUS * FRAC_1_SQRT_2;

fn kd_fudge() -> Mm {
    rand::thread_rng().gen::<Mm>() * KD_TREE_FUDGE_PER_COMPONENT
}

fn kd_add(kd_tree: &mut KdTree, point: Point, index: usize) {
    // Layer point counts are bounded by G1 counts of one layer, far below u32::MAX.
    kd_tree.add(&[point.x + kd_fudge(), point.y + kd_fudge()], index as PointIndex);
}

/// A point on the previous layer's path and how far it is from the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reference {
    pub point: Point,
    pub distance: Mm,
}

/// Finds where on the previous layer a point of the current layer should be pulled toward.
pub trait ReferenceFinder {
    /// The closest reference strictly within the finder's maximum distance, if any.
    fn find_reference(&self, point: Point) -> Option<Reference>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSearch {
    /// Closest stored point. Cheaper, but pulls toward vertices.
    Point,
    /// Closest point on any segment joining consecutive stored points.
    #[default]
    Segment,
}

impl ReferenceSearch {
    pub fn build<'a>(self, previous_layer: &'a [Point], max_distance: Mm) -> Box<dyn ReferenceFinder + 'a> {
        match self {
            ReferenceSearch::Point => Box::new(NearestPoint::new(previous_layer, max_distance)),
            ReferenceSearch::Segment => Box::new(NearestOnSegment::new(previous_layer, max_distance)),
        }
    }
}

pub struct NearestPoint<'a> {
    points: &'a [Point],
    kd_tree: KdTree,
    max_distance: Mm,
}

impl<'a> NearestPoint<'a> {
    pub fn new(points: &'a [Point], max_distance: Mm) -> NearestPoint<'a> {
        let mut kd_tree = KdTree::new();
        for (index, point) in points.iter().enumerate() {
            kd_add(&mut kd_tree, *point, index);
        }
        NearestPoint { points, kd_tree, max_distance }
    }
}

impl ReferenceFinder for NearestPoint<'_> {
    fn find_reference(&self, point: Point) -> Option<Reference> {
        if self.points.is_empty() {
            return None;
        }
        let radius = self.max_distance + KD_TREE_FUDGE_RADIUS;
        self.kd_tree
            .within_unsorted::<SquaredEuclidean>(&[point.x, point.y], radius * radius)
            .iter()
            .map(|neighbour| {
                let index = neighbour.item as usize;
                let candidate = self.points[index];
                (index, Reference { point: candidate, distance: point.distance(candidate) })
            })
            .filter(|(_, reference)| reference.distance < self.max_distance)
            .min_by_key(|(index, reference)| (OrderedFloat(reference.distance), *index))
            .map(|(_, reference)| reference)
    }
}

pub struct NearestOnSegment<'a> {
    points: &'a [Point],
    // Each entry is a sub-segment sample tagged with the index of the segment's start point.
    kd_tree: KdTree,
    max_distance: Mm,
}

impl<'a> NearestOnSegment<'a> {
    pub fn new(points: &'a [Point], max_distance: Mm) -> NearestOnSegment<'a> {
        let mut kd_tree = KdTree::new();
        if points.len() == 1 {
            // no segments; the lone point stands in for a zero-length one
            kd_add(&mut kd_tree, points[0], 0);
        }
        for (index, pair) in points.windows(2).enumerate() {
            let (segment_start, segment_end) = (pair[0], pair[1]);
            let segment_delta = segment_end - segment_start;
            let segment_length = segment_delta.norm();
            if segment_length == 0.0 {
                kd_add(&mut kd_tree, segment_start, index);
                continue;
            }
            let segment_direction_unit = segment_delta / segment_length;
            // Every point on the segment ends up within MAX_SUBSEGMENT_LENGTH of a sample.
            let mut i = 0u32;
            loop {
                let distance_from_start = MAX_SUBSEGMENT_LENGTH * (i as Mm);
                if distance_from_start > segment_length {
                    break;
                }
                kd_add(&mut kd_tree, segment_start + segment_direction_unit * distance_from_start, index);
                i += 1;
            }
        }
        NearestOnSegment { points, kd_tree, max_distance }
    }

    fn closest_on_segment(&self, point: Point, segment_start_index: usize) -> Point {
        let segment_start = self.points[segment_start_index];
        match self.points.get(segment_start_index + 1) {
            Some(segment_end) => clamp_point_to_segment(point, segment_start, *segment_end),
            None => segment_start,
        }
    }
}

impl ReferenceFinder for NearestOnSegment<'_> {
    fn find_reference(&self, point: Point) -> Option<Reference> {
        if self.points.is_empty() {
            return None;
        }
        // A segment point within max_distance has a sample at most MAX_SUBSEGMENT_LENGTH further
        // along, and that sample may have been fudged by up to KD_TREE_FUDGE_RADIUS.
        let radius = self.max_distance + MAX_SUBSEGMENT_LENGTH + KD_TREE_FUDGE_RADIUS;
        let neighbours = self.kd_tree.within_unsorted::<SquaredEuclidean>(&[point.x, point.y], radius * radius);

        // multiple sub-segments of the same segment can be returned
        let mut checked_segments: HashSet<usize> = HashSet::new();
        let mut best: Option<(usize, Reference)> = None;
        for neighbour in neighbours {
            let segment_start_index = neighbour.item as usize;
            if !checked_segments.insert(segment_start_index) {
                continue;
            }
            let candidate = self.closest_on_segment(point, segment_start_index);
            let reference = Reference { point: candidate, distance: point.distance(candidate) };
            if reference.distance >= self.max_distance {
                continue;
            }
            let better = match &best {
                None => true,
                Some((best_index, best_reference)) => {
                    (OrderedFloat(reference.distance), segment_start_index) < (OrderedFloat(best_reference.distance), *best_index)
                }
            };
            if better {
                best = Some((segment_start_index, reference));
            }
        }
        best.map(|(_, reference)| reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point_segment_distance;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn square_loop() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(0.0, 0.0),
        ]
    }

    fn brute_force_point(points: &[Point], query: Point) -> Mm {
        points.iter().map(|p| p.distance(query)).fold(Mm::INFINITY, Mm::min)
    }

    fn brute_force_segment(points: &[Point], query: Point) -> Mm {
        points
            .windows(2)
            .map(|pair| point_segment_distance(query, pair[0], pair[1]))
            .fold(Mm::INFINITY, Mm::min)
    }

    #[test]
    fn segment_search_projects_onto_edge() {
        let layer = square_loop();
        let finder = NearestOnSegment::new(&layer, 2.0);
        let reference = finder.find_reference(Point::new(5.0, 0.5)).unwrap();
        assert_abs_diff_eq!(reference.point.x, 5.0, epsilon = 1e-5);
        assert_abs_diff_eq!(reference.point.y, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(reference.distance, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn point_search_only_sees_vertices() {
        let layer = square_loop();
        let finder = NearestPoint::new(&layer, 2.0);
        assert!(finder.find_reference(Point::new(5.0, 0.5)).is_none());
        let reference = finder.find_reference(Point::new(9.5, 0.5)).unwrap();
        assert_eq!(reference.point, Point::new(10.0, 0.0));
    }

    #[test]
    fn nothing_found_beyond_max_distance() {
        let layer = square_loop();
        for search in [ReferenceSearch::Point, ReferenceSearch::Segment] {
            let finder = search.build(&layer, 2.0);
            assert!(finder.find_reference(Point::new(5.0, 5.0)).is_none());
            assert!(finder.find_reference(Point::new(-2.5, 5.0)).is_none());
        }
    }

    #[test]
    fn distance_at_bound_is_excluded() {
        let layer = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)];
        let finder = NearestOnSegment::new(&layer, 2.0);
        assert!(finder.find_reference(Point::new(5.0, 2.0)).is_none());
        assert!(finder.find_reference(Point::new(5.0, 1.99)).is_some());
    }

    #[test]
    fn empty_layer_finds_nothing() {
        let layer: Vec<Point> = vec![];
        for search in [ReferenceSearch::Point, ReferenceSearch::Segment] {
            assert!(search.build(&layer, 2.0).find_reference(Point::new(0.0, 0.0)).is_none());
        }
    }

    #[test]
    fn single_point_layer_acts_like_point_search() {
        let layer = vec![Point::new(1.0, 1.0)];
        let finder = NearestOnSegment::new(&layer, 2.0);
        let reference = finder.find_reference(Point::new(1.0, 2.0)).unwrap();
        assert_eq!(reference.point, Point::new(1.0, 1.0));
        assert_abs_diff_eq!(reference.distance, 1.0);
    }

    #[test]
    fn long_segment_found_far_from_its_endpoints() {
        let layer = vec![Point::new(0.0, 0.0), Point::new(100.0, 0.0)];
        let finder = NearestOnSegment::new(&layer, 2.0);
        let reference = finder.find_reference(Point::new(51.3, -1.0)).unwrap();
        assert_abs_diff_eq!(reference.point.x, 51.3, epsilon = 1e-4);
        assert_abs_diff_eq!(reference.distance, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn dense_axis_aligned_wall_builds() {
        // hundreds of points sharing x would overflow an unfudged bucket
        let layer: Vec<Point> = (0..400).map(|i| Point::new(0.0, i as Mm * 0.05)).collect();
        let finder = NearestPoint::new(&layer, 2.0);
        let reference = finder.find_reference(Point::new(0.5, 10.0)).unwrap();
        assert_abs_diff_eq!(reference.distance, 0.5, epsilon = 1e-5);
        let finder = NearestOnSegment::new(&layer, 2.0);
        assert!(finder.find_reference(Point::new(0.5, 10.02)).is_some());
    }

    #[test]
    fn kd_tree_search_agrees_with_linear_scan() {
        let mut rng = StdRng::seed_from_u64(17);
        // a wobbly loop, roughly what a vase perimeter looks like
        let layer: Vec<Point> = (0..=240)
            .map(|i| {
                let angle = i as Mm / 240.0 * std::f32::consts::TAU;
                let radius = 20.0 + rng.gen_range(-0.3..0.3);
                Point::new(radius * angle.cos(), radius * angle.sin())
            })
            .collect();
        let max_distance = 2.0;
        let by_point = NearestPoint::new(&layer, max_distance);
        let by_segment = NearestOnSegment::new(&layer, max_distance);
        for _ in 0..500 {
            let query = Point::new(rng.gen_range(-24.0..24.0), rng.gen_range(-24.0..24.0));

            let expected = brute_force_point(&layer, query);
            match by_point.find_reference(query) {
                Some(reference) => assert_abs_diff_eq!(reference.distance, expected, epsilon = 1e-4),
                None => assert!(expected >= max_distance - 1e-4),
            }

            let expected = brute_force_segment(&layer, query);
            match by_segment.find_reference(query) {
                Some(reference) => assert_abs_diff_eq!(reference.distance, expected, epsilon = 1e-4),
                None => assert!(expected >= max_distance - 1e-4),
            }
        }
    }
}
