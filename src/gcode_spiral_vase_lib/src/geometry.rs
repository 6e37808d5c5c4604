use std::ops;

use crate::{Factor, Mm};

// Everything the spiral rewrite needs happens in the XY plane; Z is derived from cumulative XY
// length rather than from geometry, so there's no 3D point type here.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: Mm,
    pub y: Mm,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Vec2 {
    pub x: Mm,
    pub y: Mm,
}

impl Point {
    pub fn new(x: Mm, y: Mm) -> Point {
        Point { x, y }
    }

    pub fn distance(&self, other: Point) -> Mm {
        (*self - other).norm()
    }

    /// `t * self + (1 - t) * other`. Not clamped, so a `t` that drifted slightly past 0 or 1
    /// just extrapolates a hair.
    pub fn lerp(&self, other: Point, t: Factor) -> Point {
        Point {
            x: t * self.x + (1.0 - t) * other.x,
            y: t * self.y + (1.0 - t) * other.y,
        }
    }
}

impl Vec2 {
    pub fn norm(&self) -> Mm {
        (self.x * self.x + self.y * self.y).sqrt()
    }
    pub fn norm_squared(&self) -> Mm {
        self.x * self.x + self.y * self.y
    }
    pub fn dot(&self, rhs: Vec2) -> Mm {
        self.x * rhs.x + self.y * rhs.y
    }
}

impl ops::Add<Vec2> for Point {
    type Output = Point;

    fn add(self, rhs: Vec2) -> Point {
        Point { x: self.x + rhs.x, y: self.y + rhs.y }
    }
}

impl ops::Sub<Point> for Point {
    type Output = Vec2;

    fn sub(self, rhs: Point) -> Vec2 {
        Vec2 { x: self.x - rhs.x, y: self.y - rhs.y }
    }
}

impl ops::Mul<Factor> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: Factor) -> Vec2 {
        Vec2 { x: self.x * rhs, y: self.y * rhs }
    }
}

impl ops::Div<Factor> for Vec2 {
    type Output = Vec2;

    fn div(self, rhs: Factor) -> Vec2 {
        Vec2 { x: self.x / rhs, y: self.y / rhs }
    }
}

/// Closest point to `loc` on the segment from `segment_start` to `segment_end`.
///
/// The projection parameter is clamped to `[0, 1]` so the result never leaves the segment. A
/// degenerate (zero length) segment is just its start point.
pub fn clamp_point_to_segment(loc: Point, segment_start: Point, segment_end: Point) -> Point {
    let end_minus_start = segment_end - segment_start;
    let end_minus_start_norm_squared = end_minus_start.norm_squared();
    if end_minus_start_norm_squared == 0.0 {
        return segment_start;
    }
    let loc_minus_start = loc - segment_start;
    let t = loc_minus_start.dot(end_minus_start) / end_minus_start_norm_squared;
    segment_start + end_minus_start * t.clamp(0.0, 1.0)
}

pub fn point_segment_distance(loc: Point, segment_start: Point, segment_end: Point) -> Mm {
    let clamped_loc_perp_intersect = clamp_point_to_segment(loc, segment_start, segment_end);
    (loc - clamped_loc_perp_intersect).norm()
}
