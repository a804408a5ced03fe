//! Small geometric helpers shared by the operators.

use nalgebra::{Vector2, Vector3};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vector3<f32>,
    /// Maximum corner.
    pub max: Vector3<f32>,
}

impl Aabb {
    /// An empty box that any point extends.
    pub fn empty() -> Self {
        Self {
            min: Vector3::repeat(f32::MAX),
            max: Vector3::repeat(f32::MIN),
        }
    }

    /// Bounding box of a point set, empty for no points.
    pub fn from_points<'a, I: IntoIterator<Item = &'a Vector3<f32>>>(points: I) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.extend(p);
        }
        aabb
    }

    /// Grow to contain `p`.
    #[inline]
    pub fn extend(&mut self, p: &Vector3<f32>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    /// Whether no point was added.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    /// Length of the diagonal, zero when empty.
    pub fn diagonal(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            (self.max - self.min).norm()
        }
    }

    /// Center of the box.
    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    /// Whether `p` lies inside, borders included, after growing by `eps`.
    pub fn contains(&self, p: &Vector3<f32>, eps: f32) -> bool {
        p.x >= self.min.x - eps
            && p.y >= self.min.y - eps
            && p.z >= self.min.z - eps
            && p.x <= self.max.x + eps
            && p.y <= self.max.y + eps
            && p.z <= self.max.z + eps
    }

    /// Squared distance from `p` to the box.
    pub fn distance_squared(&self, p: &Vector3<f32>) -> f32 {
        let clamped = p.sup(&self.min).inf(&self.max);
        (p - clamped).norm_squared()
    }
}

/// Unnormalized face normal, twice the triangle area long.
#[inline]
pub fn triangle_cross(a: &Vector3<f32>, b: &Vector3<f32>, c: &Vector3<f32>) -> Vector3<f32> {
    (b - a).cross(&(c - a))
}

/// Unit face normal, zero for degenerate triangles.
pub fn triangle_normal(a: &Vector3<f32>, b: &Vector3<f32>, c: &Vector3<f32>) -> Vector3<f32> {
    triangle_cross(a, b, c)
        .try_normalize(1e-20)
        .unwrap_or_else(Vector3::zeros)
}

/// Barycentric coordinates of `p` in the 2-D triangle `a, b, c`.
///
/// Returns `None` for triangles with (near) zero area.
pub fn barycentric_2d(
    p: &Vector2<f32>,
    a: &Vector2<f32>,
    b: &Vector2<f32>,
    c: &Vector2<f32>,
) -> Option<Vector3<f32>> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let den = v0.x * v1.y - v1.x * v0.y;
    if den.abs() <= f32::EPSILON * (v0.norm_squared() + v1.norm_squared()).max(f32::MIN_POSITIVE) {
        return None;
    }
    let v = (v2.x * v1.y - v1.x * v2.y) / den;
    let w = (v0.x * v2.y - v2.x * v0.y) / den;
    Some(Vector3::new(1.0 - v - w, v, w))
}

/// Barycentric coordinates of the projection of `p` onto the plane of `a, b, c`.
pub fn barycentric_3d(
    p: &Vector3<f32>,
    a: &Vector3<f32>,
    b: &Vector3<f32>,
    c: &Vector3<f32>,
) -> Option<Vector3<f32>> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let den = d00 * d11 - d01 * d01;
    if den.abs() <= 1e-20 {
        return None;
    }
    let v = (d11 * d20 - d01 * d21) / den;
    let w = (d00 * d21 - d01 * d20) / den;
    Some(Vector3::new(1.0 - v - w, v, w))
}

/// Closest point to `p` on triangle `a, b, c` and its barycentric coordinates.
pub fn closest_point_on_triangle(
    p: &Vector3<f32>,
    a: &Vector3<f32>,
    b: &Vector3<f32>,
    c: &Vector3<f32>,
) -> (Vector3<f32>, Vector3<f32>) {
    let ab = b - a;
    let ac = c - a;
    if ab.cross(&ac).norm_squared() <= 1e-24 {
        // Degenerate: pick the nearest corner.
        let corners = [(a, Vector3::x()), (b, Vector3::y()), (c, Vector3::z())];
        let (q, bary) = corners
            .iter()
            .min_by(|x, y| {
                (p - x.0)
                    .norm_squared()
                    .total_cmp(&(p - y.0).norm_squared())
            })
            .map(|&(q, bary)| (*q, bary))
            .unwrap_or((*a, Vector3::x()));
        return (q, bary);
    }

    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (*a, Vector3::new(1.0, 0.0, 0.0));
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (*b, Vector3::new(0.0, 1.0, 0.0));
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, Vector3::new(1.0 - v, v, 0.0));
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (*c, Vector3::new(0.0, 0.0, 1.0));
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, Vector3::new(1.0 - w, 0.0, w));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, Vector3::new(0.0, 1.0 - w, w));
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, Vector3::new(1.0 - v - w, v, w))
}

/// Interpolate three values with barycentric weights.
#[inline]
pub fn interpolate(bary: &Vector3<f32>, values: [&Vector3<f32>; 3]) -> Vector3<f32> {
    values[0] * bary.x + values[1] * bary.y + values[2] * bary.z
}

/// Orthonormal frame `(tangent, bitangent, normal)` of a triangle.
///
/// The tangent follows the first edge. Degenerate triangles give the
/// identity frame.
pub fn triangle_frame(
    a: &Vector3<f32>,
    b: &Vector3<f32>,
    c: &Vector3<f32>,
) -> [Vector3<f32>; 3] {
    let n = triangle_normal(a, b, c);
    let Some(t) = (b - a).try_normalize(1e-20) else {
        return [Vector3::x(), Vector3::y(), Vector3::z()];
    };
    if n == Vector3::zeros() {
        return [Vector3::x(), Vector3::y(), Vector3::z()];
    }
    [t, n.cross(&t), n]
}
