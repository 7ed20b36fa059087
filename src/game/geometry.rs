//! Unit conversion and polygon triangulation

use crate::level::Point;

/// Scene pixels per physics meter
pub const PIXELS_PER_METER: f32 = 30.0;

/// Scene units (pixels) to physics units (meters)
#[inline]
pub fn to_physics(pixels: f32) -> f32 {
    pixels / PIXELS_PER_METER
}

/// Physics units (meters) to scene units (pixels)
#[inline]
pub fn to_scene(meters: f32) -> f32 {
    meters * PIXELS_PER_METER
}

/// Area-weighted centroid of a simple polygon. Falls back to the vertex
/// average when the polygon has no area.
pub fn centroid(vertices: &[Point]) -> Point {
    let area = signed_area(vertices);
    if area.abs() < f32::EPSILON {
        let n = vertices.len().max(1) as f32;
        let (sx, sy) = vertices
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        return Point::new(sx / n, sy / n);
    }

    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..vertices.len() {
        let a = vertices[i];
        let b = vertices[(i + 1) % vertices.len()];
        let cross = a.x * b.y - b.x * a.y;
        cx += (a.x + b.x) * cross;
        cy += (a.y + b.y) * cross;
    }
    Point::new(cx / (6.0 * area), cy / (6.0 * area))
}

/// Shoelace area; positive when counter-clockwise in a y-up frame
pub fn signed_area(vertices: &[Point]) -> f32 {
    let mut sum = 0.0;
    for i in 0..vertices.len() {
        let a = vertices[i];
        let b = vertices[(i + 1) % vertices.len()];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// Ear-clipping triangulation of a simple polygon.
///
/// Returns index triples into `vertices`, or `None` when the polygon is
/// self-intersecting or degenerate and no ear can be found.
pub fn triangulate(vertices: &[Point]) -> Option<Vec<[usize; 3]>> {
    if vertices.len() < 3 {
        return None;
    }

    // Work in counter-clockwise order so "convex" means a positive cross product.
    let mut remaining: Vec<usize> = (0..vertices.len()).collect();
    if signed_area(vertices) < 0.0 {
        remaining.reverse();
    }

    let mut triangles = Vec::with_capacity(vertices.len() - 2);
    while remaining.len() > 3 {
        let n = remaining.len();
        let ear = (0..n).find(|&i| {
            let prev = remaining[(i + n - 1) % n];
            let curr = remaining[i];
            let next = remaining[(i + 1) % n];
            is_ear(vertices, &remaining, prev, curr, next)
        })?;

        let prev = remaining[(ear + n - 1) % n];
        let next = remaining[(ear + 1) % n];
        triangles.push([prev, remaining[ear], next]);
        remaining.remove(ear);
    }
    triangles.push([remaining[0], remaining[1], remaining[2]]);

    Some(triangles)
}

fn cross(o: Point, a: Point, b: Point) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn is_ear(vertices: &[Point], remaining: &[usize], prev: usize, curr: usize, next: usize) -> bool {
    let (a, b, c) = (vertices[prev], vertices[curr], vertices[next]);
    if cross(a, b, c) <= f32::EPSILON {
        return false;
    }

    !remaining
        .iter()
        .filter(|&&idx| idx != prev && idx != curr && idx != next)
        .any(|&idx| point_in_triangle(vertices[idx], a, b, c))
}

fn point_in_triangle(p: Point, a: Point, b: Point, c: Point) -> bool {
    let d1 = cross(a, b, p);
    let d2 = cross(b, c, p);
    let d3 = cross(c, a, p);
    d1 >= 0.0 && d2 >= 0.0 && d3 >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn area_of(vertices: &[Point], triangles: &[[usize; 3]]) -> f32 {
        triangles
            .iter()
            .map(|t| signed_area(&[vertices[t[0]], vertices[t[1]], vertices[t[2]]]).abs())
            .sum()
    }

    #[test]
    fn unit_conversion_is_invertible() {
        for px in [-450.0, 0.0, 12.5, 799.0] {
            assert_approx_eq!(to_scene(to_physics(px)), px, 1e-3);
        }
        assert_eq!(to_physics(PIXELS_PER_METER), 1.0);
    }

    #[test]
    fn square_becomes_two_triangles() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];

        let triangles = triangulate(&square).unwrap();
        assert_eq!(triangles.len(), 2);
        assert_approx_eq!(area_of(&square, &triangles), 100.0, 1e-3);
    }

    #[test]
    fn concave_polygon_keeps_its_area() {
        // An "L" shape, listed clockwise to exercise the winding fix-up
        let l_shape = [
            Point::new(0.0, 0.0),
            Point::new(0.0, 20.0),
            Point::new(20.0, 20.0),
            Point::new(20.0, 10.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 0.0),
        ];

        let triangles = triangulate(&l_shape).unwrap();
        assert_eq!(triangles.len(), 4);
        assert_approx_eq!(area_of(&l_shape, &triangles), 300.0, 1e-3);
    }

    #[test]
    fn collinear_points_cannot_be_triangulated() {
        let line = [
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(15.0, 0.0),
        ];

        assert!(triangulate(&line).is_none());
    }

    #[test]
    fn centroid_of_square_is_its_center() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(0.0, 4.0),
        ];

        let c = centroid(&square);
        assert_approx_eq!(c.x, 2.0, 1e-4);
        assert_approx_eq!(c.y, 2.0, 1e-4);
    }
}
