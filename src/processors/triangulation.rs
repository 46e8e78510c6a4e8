//! Delaunay triangulation of scattered lon/lat points (Bowyer-Watson) with point location,
//! nearest-vertex search and per-vertex gradient estimates for cubic patches.

use std::collections::{BTreeSet, HashMap};

/// Barycentric weights below this are treated as zero when testing containment.
const CONTAINMENT_EPS: f64 = 1e-10;

/// Super-triangle vertices sit this many spans away from the data.
const SUPER_TRIANGLE_SCALE: f64 = 64.0;

#[derive(Debug, Clone, Copy)]
struct Triangle {
    vertices: [usize; 3],
    center: [f64; 2],
    radius_sq: f64,
}

impl Triangle {
    fn new(points: &[[f64; 2]], a: usize, b: usize, c: usize) -> Self {
        let (b, c) = if orientation(points[a], points[b], points[c]) < 0.0 {
            (c, b)
        } else {
            (b, c)
        };
        let [ax, ay] = points[a];
        let [bx, by] = points[b];
        let [cx, cy] = points[c];

        let d = 2.0 * (ax * (by - cy) + bx * (cy - ay) + cx * (ay - by));
        if d.abs() < f64::EPSILON {
            // Degenerate: every later point falls "inside", so it is always re-triangulated.
            return Self {
                vertices: [a, b, c],
                center: [(ax + bx + cx) / 3.0, (ay + by + cy) / 3.0],
                radius_sq: f64::INFINITY,
            };
        }

        let a2 = ax * ax + ay * ay;
        let b2 = bx * bx + by * by;
        let c2 = cx * cx + cy * cy;
        let ux = (a2 * (by - cy) + b2 * (cy - ay) + c2 * (ay - by)) / d;
        let uy = (a2 * (cx - bx) + b2 * (ax - cx) + c2 * (bx - ax)) / d;

        Self {
            vertices: [a, b, c],
            center: [ux, uy],
            radius_sq: (ax - ux).powi(2) + (ay - uy).powi(2),
        }
    }

    fn circumcircle_contains(&self, p: [f64; 2]) -> bool {
        let d = (p[0] - self.center[0]).powi(2) + (p[1] - self.center[1]).powi(2);
        d < self.radius_sq
    }

    fn edges(&self) -> [(usize, usize); 3] {
        let [a, b, c] = self.vertices;
        [(a, b), (b, c), (c, a)]
    }
}

fn orientation(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn distance_sq(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

/// Uniform bucket grid over the triangles' bounding boxes.
#[derive(Debug, Clone)]
struct TriangleIndex {
    min: [f64; 2],
    max: [f64; 2],
    cell: [f64; 2],
    nx: usize,
    ny: usize,
    buckets: Vec<Vec<usize>>,
}

impl TriangleIndex {
    fn build(points: &[[f64; 2]], triangles: &[[usize; 3]], min: [f64; 2], max: [f64; 2]) -> Self {
        let side = ((triangles.len() as f64).sqrt().ceil() as usize).clamp(1, 512);
        let nx = side;
        let ny = side;
        let cell = [
            ((max[0] - min[0]) / nx as f64).max(f64::MIN_POSITIVE),
            ((max[1] - min[1]) / ny as f64).max(f64::MIN_POSITIVE),
        ];

        let mut index = Self {
            min,
            max,
            cell,
            nx,
            ny,
            buckets: vec![Vec::new(); nx * ny],
        };

        for (t, tri) in triangles.iter().enumerate() {
            let xs = tri.map(|v| points[v][0]);
            let ys = tri.map(|v| points[v][1]);
            let (x0, x1) = (xs.iter().copied().fold(f64::INFINITY, f64::min), xs.iter().copied().fold(f64::NEG_INFINITY, f64::max));
            let (y0, y1) = (ys.iter().copied().fold(f64::INFINITY, f64::min), ys.iter().copied().fold(f64::NEG_INFINITY, f64::max));
            let (i0, j0) = index.bucket([x0, y0]);
            let (i1, j1) = index.bucket([x1, y1]);
            for j in j0..=j1 {
                for i in i0..=i1 {
                    index.buckets[j * nx + i].push(t);
                }
            }
        }

        index
    }

    fn bucket(&self, p: [f64; 2]) -> (usize, usize) {
        let i = ((p[0] - self.min[0]) / self.cell[0]).floor().max(0.0) as usize;
        let j = ((p[1] - self.min[1]) / self.cell[1]).floor().max(0.0) as usize;
        (i.min(self.nx - 1), j.min(self.ny - 1))
    }

    fn covers(&self, p: [f64; 2]) -> bool {
        let tol_x = self.cell[0] * 1e-9;
        let tol_y = self.cell[1] * 1e-9;
        p[0] >= self.min[0] - tol_x
            && p[0] <= self.max[0] + tol_x
            && p[1] >= self.min[1] - tol_y
            && p[1] <= self.max[1] + tol_y
    }

    fn candidates(&self, p: [f64; 2]) -> &[usize] {
        let (i, j) = self.bucket(p);
        &self.buckets[j * self.nx + i]
    }
}

/// A triangle hit: triangle index and barycentric weights of its three vertices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub triangle: usize,
    pub vertices: [usize; 3],
    pub weights: [f64; 3],
}

#[derive(Debug, Clone)]
pub struct Triangulation {
    points: Vec<[f64; 2]>,
    triangles: Vec<[usize; 3]>,
    neighbours: Vec<Vec<usize>>,
    index: TriangleIndex,
}

impl Triangulation {
    /// Triangulate distinct points. Returns `None` when they don't span an area
    /// (fewer than three points, or all collinear).
    pub fn new(points: Vec<[f64; 2]>) -> Option<Self> {
        let n = points.len();
        if n < 3 {
            return None;
        }

        let mut min = [f64::INFINITY; 2];
        let mut max = [f64::NEG_INFINITY; 2];
        for p in &points {
            min = [min[0].min(p[0]), min[1].min(p[1])];
            max = [max[0].max(p[0]), max[1].max(p[1])];
        }
        let span = (max[0] - min[0]).max(max[1] - min[1]);
        if !span.is_finite() || span <= 0.0 {
            return None;
        }
        let mid = [(min[0] + max[0]) / 2.0, (min[1] + max[1]) / 2.0];
        let reach = SUPER_TRIANGLE_SCALE * span;

        let mut all = points;
        all.push([mid[0] - reach, mid[1] - reach]);
        all.push([mid[0] + reach, mid[1] - reach]);
        all.push([mid[0], mid[1] + reach]);

        let mut triangles = vec![Triangle::new(&all, n, n + 1, n + 2)];
        let mut edge_counts: HashMap<(usize, usize), u8> = HashMap::new();

        for p in 0..n {
            let point = all[p];
            let (bad, good): (Vec<Triangle>, Vec<Triangle>) = triangles
                .into_iter()
                .partition(|t| t.circumcircle_contains(point));
            triangles = good;

            edge_counts.clear();
            for t in &bad {
                for (a, b) in t.edges() {
                    *edge_counts.entry((a.min(b), a.max(b))).or_insert(0) += 1;
                }
            }
            for t in &bad {
                for (a, b) in t.edges() {
                    if edge_counts.get(&(a.min(b), a.max(b))) == Some(&1) {
                        triangles.push(Triangle::new(&all, a, b, p));
                    }
                }
            }
        }

        all.truncate(n);
        let area_floor = span * span * 1e-14;
        let triangles: Vec<[usize; 3]> = triangles
            .into_iter()
            .filter(|t| t.vertices.iter().all(|&v| v < n))
            .map(|t| t.vertices)
            .filter(|[a, b, c]| orientation(all[*a], all[*b], all[*c]).abs() > area_floor)
            .collect();

        if triangles.is_empty() {
            return None;
        }

        let mut adjacency: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for &[a, b, c] in &triangles {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                adjacency[u].insert(v);
                adjacency[v].insert(u);
            }
        }
        let neighbours = adjacency.into_iter().map(|s| s.into_iter().collect()).collect();
        let index = TriangleIndex::build(&all, &triangles, min, max);

        Some(Self {
            points: all,
            triangles,
            neighbours,
            index,
        })
    }

    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Triangle containing `p`, or `None` outside the convex hull.
    pub fn locate(&self, p: [f64; 2]) -> Option<Location> {
        if !self.index.covers(p) {
            return None;
        }
        self.index.candidates(p).iter().find_map(|&t| {
            let vertices = self.triangles[t];
            barycentric(p, vertices.map(|v| self.points[v])).map(|weights| Location {
                triangle: t,
                vertices,
                weights,
            })
        })
    }

    /// Nearest data point to `p`, walking the Delaunay graph from the located triangle.
    pub fn nearest_vertex(&self, p: [f64; 2], location: &Location) -> usize {
        let mut best = location.vertices[0];
        let mut best_d = distance_sq(p, self.points[best]);
        for &v in &location.vertices[1..] {
            let d = distance_sq(p, self.points[v]);
            if d < best_d {
                best = v;
                best_d = d;
            }
        }

        loop {
            let mut improved = false;
            for &v in &self.neighbours[best] {
                let d = distance_sq(p, self.points[v]);
                if d < best_d {
                    best = v;
                    best_d = d;
                    improved = true;
                }
            }
            if !improved {
                return best;
            }
        }
    }

    /// Least-squares gradient at every vertex from its Delaunay neighbours.
    pub fn gradients(&self, values: &[f64]) -> Vec<[f64; 2]> {
        (0..self.points.len())
            .map(|i| {
                let [xi, yi] = self.points[i];
                let (mut sxx, mut sxy, mut syy, mut sxf, mut syf) = (0.0, 0.0, 0.0, 0.0, 0.0);
                for &j in &self.neighbours[i] {
                    let dx = self.points[j][0] - xi;
                    let dy = self.points[j][1] - yi;
                    let df = values[j] - values[i];
                    sxx += dx * dx;
                    sxy += dx * dy;
                    syy += dy * dy;
                    sxf += dx * df;
                    syf += dy * df;
                }
                let det = sxx * syy - sxy * sxy;
                if det.abs() <= f64::EPSILON * (sxx * syy).max(f64::MIN_POSITIVE) {
                    [0.0, 0.0]
                } else {
                    [(syy * sxf - sxy * syf) / det, (sxx * syf - sxy * sxf) / det]
                }
            })
            .collect()
    }

    /// Cubic Bézier patch over the located triangle, built from vertex values and gradients.
    /// Reproduces linear fields exactly and quadratics when the gradients are exact.
    pub fn cubic(&self, location: &Location, values: &[f64], gradients: &[[f64; 2]]) -> f64 {
        let [a, b, c] = location.vertices;
        let [u, v, w] = location.weights;
        let (pa, pb, pc) = (self.points[a], self.points[b], self.points[c]);

        let edge = |from: usize, pf: [f64; 2], to: [f64; 2]| {
            let g = gradients[from];
            values[from] + (g[0] * (to[0] - pf[0]) + g[1] * (to[1] - pf[1])) / 3.0
        };

        let (fa, fb, fc) = (values[a], values[b], values[c]);
        let b210 = edge(a, pa, pb);
        let b201 = edge(a, pa, pc);
        let b120 = edge(b, pb, pa);
        let b021 = edge(b, pb, pc);
        let b102 = edge(c, pc, pa);
        let b012 = edge(c, pc, pb);
        let e = (b210 + b201 + b120 + b021 + b102 + b012) / 6.0;
        let centre = (fa + fb + fc) / 3.0;
        let b111 = e + (e - centre) / 2.0;

        fa * u.powi(3)
            + fb * v.powi(3)
            + fc * w.powi(3)
            + 3.0 * (b210 * u * u * v + b201 * u * u * w + b120 * u * v * v)
            + 3.0 * (b021 * v * v * w + b102 * u * w * w + b012 * v * w * w)
            + 6.0 * b111 * u * v * w
    }
}

/// Barycentric weights of `p` in the triangle, if it lies inside (edges included).
pub fn barycentric(p: [f64; 2], [a, b, c]: [[f64; 2]; 3]) -> Option<[f64; 3]> {
    let det = (b[1] - c[1]) * (a[0] - c[0]) + (c[0] - b[0]) * (a[1] - c[1]);
    if det.abs() < f64::MIN_POSITIVE {
        return None;
    }
    let l1 = ((b[1] - c[1]) * (p[0] - c[0]) + (c[0] - b[0]) * (p[1] - c[1])) / det;
    let l2 = ((c[1] - a[1]) * (p[0] - c[0]) + (a[0] - c[0]) * (p[1] - c[1])) / det;
    let l3 = 1.0 - l1 - l2;

    if l1 < -CONTAINMENT_EPS || l2 < -CONTAINMENT_EPS || l3 < -CONTAINMENT_EPS {
        return None;
    }
    let clamp = |w: f64| w.max(0.0);
    let (l1, l2, l3) = (clamp(l1), clamp(l2), clamp(l3));
    let sum = l1 + l2 + l3;
    Some([l1 / sum, l2 / sum, l3 / sum])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Triangulation {
        Triangulation::new(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.4, 0.6]])
            .unwrap()
    }

    #[test]
    fn test_triangle_count_follows_euler() {
        // 4 hull points, 1 interior: 2n - h - 2 = 4 triangles
        let tri = square();
        assert_eq!(tri.triangles().len(), 4);
    }

    #[test]
    fn test_delaunay_property() {
        let points: Vec<[f64; 2]> = (0..40)
            .map(|k| {
                let k = k as f64;
                [(k * 0.618_034).fract() * 10.0, (k * 0.414_214).fract() * 10.0]
            })
            .collect();
        let tri = Triangulation::new(points.clone()).unwrap();

        for t in tri.triangles() {
            let triangle = Triangle::new(&points, t[0], t[1], t[2]);
            for (i, p) in points.iter().enumerate() {
                if t.contains(&i) {
                    continue;
                }
                let d = distance_sq(*p, triangle.center);
                assert!(d >= triangle.radius_sq * (1.0 - 1e-9));
            }
        }
    }

    #[test]
    fn test_locate_inside_and_outside() {
        let tri = square();
        let location = tri.locate([0.9, 0.1]).unwrap();
        assert!((location.weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(tri.locate([1.5, 0.5]).is_none());
        assert!(tri.locate([-0.01, 0.5]).is_none());
        // hull vertex itself is inside
        assert!(tri.locate([1.0, 1.0]).is_some());
    }

    #[test]
    fn test_nearest_vertex() {
        let tri = square();
        let p = [0.45, 0.55];
        let location = tri.locate(p).unwrap();
        assert_eq!(tri.nearest_vertex(p, &location), 4);
    }

    #[test]
    fn test_collinear_points_rejected() {
        assert!(Triangulation::new(vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]).is_none());
        assert!(Triangulation::new(vec![[0.0, 0.0], [1.0, 1.0]]).is_none());
    }

    #[test]
    fn test_cubic_reproduces_linear_field() {
        let tri = square();
        let values: Vec<f64> = tri.points().iter().map(|p| 2.0 * p[0] - 3.0 * p[1] + 1.0).collect();
        let gradients = tri.gradients(&values);
        for g in &gradients {
            assert!((g[0] - 2.0).abs() < 1e-9 && (g[1] + 3.0).abs() < 1e-9);
        }

        let p = [0.7, 0.2];
        let location = tri.locate(p).unwrap();
        let expected = 2.0 * p[0] - 3.0 * p[1] + 1.0;
        assert!((tri.cubic(&location, &values, &gradients) - expected).abs() < 1e-9);
    }
}
