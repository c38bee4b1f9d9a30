//! Closest-point queries against a detached triangle mesh.
//!
//! A [`TriangleMesh`] is a throwaway reconstruction of a mesh snapshot used
//! for weight-map interpolation. Faces are fan-triangulated and stored in a
//! bounding-volume hierarchy so each query visits only nearby triangles.

pub type Vec3 = [f64; 3];

/// Maximum triangles held by one BVH leaf.
const LEAF_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// Vector helpers
// ---------------------------------------------------------------------------

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn distance_sq(a: Vec3, b: Vec3) -> f64 {
    let d = sub(a, b);
    dot(d, d)
}

/// `n / d`, or zero when the denominator vanishes (degenerate triangle).
fn ratio(n: f64, d: f64) -> f64 {
    if d == 0.0 { 0.0 } else { n / d }
}

// ---------------------------------------------------------------------------
// Closest point on triangle
// ---------------------------------------------------------------------------

/// Closest point to `p` on triangle `(a, b, c)` together with its
/// barycentric weights for `a`, `b` and `c`.
///
/// Voronoi-region walk: the point is classified against the three vertex
/// regions, the three edge regions, and finally the face interior. Every
/// returned weight lies in `[0, 1]` and the three sum to one.
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> (Vec3, [f64; 3]) {
    let ab = sub(b, a);
    let ac = sub(c, a);
    let ap = sub(p, a);
    let d1 = dot(ab, ap);
    let d2 = dot(ac, ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, [1.0, 0.0, 0.0]);
    }

    let bp = sub(p, b);
    let d3 = dot(ab, bp);
    let d4 = dot(ac, bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, [0.0, 1.0, 0.0]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = ratio(d1, d1 - d3);
        return (add(a, scale(ab, v)), [1.0 - v, v, 0.0]);
    }

    let cp = sub(p, c);
    let d5 = dot(ab, cp);
    let d6 = dot(ac, cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, [0.0, 0.0, 1.0]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = ratio(d2, d2 - d6);
        return (add(a, scale(ac, w)), [1.0 - w, 0.0, w]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = ratio(d4 - d3, (d4 - d3) + (d5 - d6));
        return (add(b, scale(sub(c, b), w)), [0.0, 1.0 - w, w]);
    }

    let denom = va + vb + vc;
    let v = ratio(vb, denom);
    let w = ratio(vc, denom);
    (add(a, add(scale(ab, v), scale(ac, w))), [1.0 - v - w, v, w])
}

// ---------------------------------------------------------------------------
// Bounding boxes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Aabb {
    min: Vec3,
    max: Vec3,
}

impl Aabb {
    fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    fn grow(&mut self, p: Vec3) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    fn longest_axis(&self) -> usize {
        let extent = sub(self.max, self.min);
        if extent[0] >= extent[1] && extent[0] >= extent[2] {
            0
        } else if extent[1] >= extent[2] {
            1
        } else {
            2
        }
    }

    /// Squared distance from `p` to the box (zero inside).
    fn distance_sq(&self, p: Vec3) -> f64 {
        let mut d = 0.0;
        for axis in 0..3 {
            let v = if p[axis] < self.min[axis] {
                self.min[axis] - p[axis]
            } else if p[axis] > self.max[axis] {
                p[axis] - self.max[axis]
            } else {
                0.0
            };
            d += v * v;
        }
        d
    }
}

#[derive(Debug, Clone)]
enum BvhNode {
    Leaf { bounds: Aabb, start: usize, count: usize },
    Inner { bounds: Aabb, left: usize, right: usize },
}

impl BvhNode {
    fn bounds(&self) -> &Aabb {
        match self {
            BvhNode::Leaf { bounds, .. } | BvhNode::Inner { bounds, .. } => bounds,
        }
    }
}

// ---------------------------------------------------------------------------
// TriangleMesh
// ---------------------------------------------------------------------------

/// Result of a closest-point query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestHit {
    /// Vertex indices of the triangle containing the closest point.
    pub triangle: [u32; 3],
    /// The closest point itself.
    pub point: Vec3,
    /// Barycentric weights for the three triangle vertices.
    pub weights: [f64; 3],
    pub distance_sq: f64,
}

impl ClosestHit {
    /// Blend per-vertex values with this hit's barycentric weights.
    pub fn blend(&self, values: &[f64]) -> f64 {
        self.triangle
            .iter()
            .zip(self.weights.iter())
            .map(|(&v, &w)| values[v as usize] * w)
            .sum()
    }
}

/// A triangulated, query-ready copy of a mesh.
#[derive(Debug, Clone)]
pub struct TriangleMesh {
    points: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    /// Triangle indices, permuted so every leaf owns a contiguous range.
    order: Vec<usize>,
    nodes: Vec<BvhNode>,
}

impl TriangleMesh {
    /// Build from points and triangles. Triangle indices must already be
    /// validated against `points`.
    pub fn new(points: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        let centroids: Vec<Vec3> = triangles
            .iter()
            .map(|t| {
                let s = add(add(points[t[0] as usize], points[t[1] as usize]), points[t[2] as usize]);
                scale(s, 1.0 / 3.0)
            })
            .collect();
        let mut mesh = Self {
            points,
            order: (0..triangles.len()).collect(),
            triangles,
            nodes: Vec::new(),
        };
        if !mesh.triangles.is_empty() {
            let count = mesh.triangles.len();
            mesh.build_node(&centroids, 0, count);
        }
        mesh
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.points.len()
    }

    fn bounds_of(&self, start: usize, count: usize) -> Aabb {
        let mut bounds = Aabb::empty();
        for &tri in &self.order[start..start + count] {
            for &v in &self.triangles[tri] {
                bounds.grow(self.points[v as usize]);
            }
        }
        bounds
    }

    /// Recursively split `order[start..start + count]` at the median
    /// centroid along the longest axis. Returns the node index.
    fn build_node(&mut self, centroids: &[Vec3], start: usize, count: usize) -> usize {
        let bounds = self.bounds_of(start, count);
        let index = self.nodes.len();
        if count <= LEAF_SIZE {
            self.nodes.push(BvhNode::Leaf { bounds, start, count });
            return index;
        }

        let axis = bounds.longest_axis();
        let mid = count / 2;
        self.order[start..start + count].select_nth_unstable_by(mid, |&a, &b| {
            centroids[a][axis].total_cmp(&centroids[b][axis])
        });

        // Placeholder, patched once both children exist.
        self.nodes.push(BvhNode::Leaf { bounds, start, count: 0 });
        let left = self.build_node(centroids, start, mid);
        let right = self.build_node(centroids, start + mid, count - mid);
        self.nodes[index] = BvhNode::Inner { bounds, left, right };
        index
    }

    /// Closest point on the surface to `p`, or `None` for an empty mesh.
    pub fn closest_point(&self, p: Vec3) -> Option<ClosestHit> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best: Option<ClosestHit> = None;
        let mut stack = vec![0usize];

        while let Some(node) = stack.pop() {
            let best_d = best.map_or(f64::INFINITY, |h| h.distance_sq);
            if self.nodes[node].bounds().distance_sq(p) > best_d {
                continue;
            }
            match self.nodes[node] {
                BvhNode::Leaf { start, count, .. } => {
                    for &tri in &self.order[start..start + count] {
                        let t = self.triangles[tri];
                        let (point, weights) = closest_point_on_triangle(
                            p,
                            self.points[t[0] as usize],
                            self.points[t[1] as usize],
                            self.points[t[2] as usize],
                        );
                        let d = distance_sq(p, point);
                        if best.is_none_or(|h| d < h.distance_sq) {
                            best = Some(ClosestHit {
                                triangle: t,
                                point,
                                weights,
                                distance_sq: d,
                            });
                        }
                    }
                }
                BvhNode::Inner { left, right, .. } => {
                    // Visit the nearer child first: push it last.
                    let dl = self.nodes[left].bounds().distance_sq(p);
                    let dr = self.nodes[right].bounds().distance_sq(p);
                    if dl <= dr {
                        stack.push(right);
                        stack.push(left);
                    } else {
                        stack.push(left);
                        stack.push(right);
                    }
                }
            }
        }
        best
    }

    /// Exhaustive search, used to cross-check the hierarchy in tests.
    #[cfg(test)]
    fn closest_point_brute(&self, p: Vec3) -> Option<f64> {
        self.triangles
            .iter()
            .map(|t| {
                let (q, _) = closest_point_on_triangle(
                    p,
                    self.points[t[0] as usize],
                    self.points[t[1] as usize],
                    self.points[t[2] as usize],
                );
                distance_sq(p, q)
            })
            .min_by(|a, b| a.total_cmp(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    const A: Vec3 = [0.0, 0.0, 0.0];
    const B: Vec3 = [1.0, 0.0, 0.0];
    const C: Vec3 = [0.0, 1.0, 0.0];

    #[test]
    fn interior_point_projects_onto_face() {
        let (q, w) = closest_point_on_triangle([0.25, 0.25, 3.0], A, B, C);
        assert!(approx(q[0], 0.25) && approx(q[1], 0.25) && approx(q[2], 0.0));
        assert!(approx(w[0], 0.5) && approx(w[1], 0.25) && approx(w[2], 0.25));
    }

    #[test]
    fn vertex_regions_snap_to_corners() {
        assert_eq!(closest_point_on_triangle([-1.0, -1.0, 0.0], A, B, C).1, [1.0, 0.0, 0.0]);
        assert_eq!(closest_point_on_triangle([2.0, -0.5, 0.0], A, B, C).1, [0.0, 1.0, 0.0]);
        assert_eq!(closest_point_on_triangle([-0.5, 2.0, 0.0], A, B, C).1, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn edge_region_interpolates_along_edge() {
        let (q, w) = closest_point_on_triangle([0.5, -1.0, 0.0], A, B, C);
        assert!(approx(q[0], 0.5) && approx(q[1], 0.0));
        assert!(approx(w[0], 0.5) && approx(w[1], 0.5) && approx(w[2], 0.0));

        let (q, w) = closest_point_on_triangle([1.0, 1.0, 0.0], A, B, C);
        assert!(approx(q[0], 0.5) && approx(q[1], 0.5));
        assert!(approx(w[0], 0.0) && approx(w[1], 0.5) && approx(w[2], 0.5));
    }

    #[test]
    fn degenerate_triangle_stays_finite() {
        let (q, w) = closest_point_on_triangle([0.3, 0.2, 0.0], A, A, A);
        assert_eq!(q, A);
        assert!(w.iter().all(|x| x.is_finite()));
        assert!(approx(w.iter().sum::<f64>(), 1.0));
    }

    fn grid(n: u32) -> TriangleMesh {
        let mut points = Vec::new();
        for j in 0..=n {
            for i in 0..=n {
                points.push([i as f64, 0.0, j as f64]);
            }
        }
        let mut triangles = Vec::new();
        let row = n + 1;
        for j in 0..n {
            for i in 0..n {
                let v0 = j * row + i;
                triangles.push([v0, v0 + 1, v0 + row + 1]);
                triangles.push([v0, v0 + row + 1, v0 + row]);
            }
        }
        TriangleMesh::new(points, triangles)
    }

    #[test]
    fn bvh_matches_brute_force() {
        let mesh = grid(8);
        assert_eq!(mesh.triangle_count(), 128);
        let queries = [
            [0.1, 0.5, 0.1],
            [3.7, -2.0, 5.2],
            [9.0, 1.0, 9.0],
            [-3.0, 0.0, 4.4],
            [4.5, 0.0, 4.5],
        ];
        for p in queries {
            let hit = mesh.closest_point(p).unwrap();
            let brute = mesh.closest_point_brute(p).unwrap();
            assert!(approx(hit.distance_sq, brute), "query point {p:?}");
        }
    }

    #[test]
    fn blend_uses_triangle_vertices() {
        let mesh = TriangleMesh::new(vec![A, B, C], vec![[0, 1, 2]]);
        let hit = mesh.closest_point([0.25, 0.25, 1.0]).unwrap();
        let blended = hit.blend(&[0.0, 1.0, 1.0]);
        assert!(approx(blended, 0.5));
    }

    #[test]
    fn empty_mesh_has_no_hit() {
        let mesh = TriangleMesh::new(Vec::new(), Vec::new());
        assert!(mesh.closest_point([0.0; 3]).is_none());
    }
}
