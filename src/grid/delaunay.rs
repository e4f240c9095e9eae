/// Delaunay triangulation (Bowyer-Watson) and barycentric interpolation of scattered points
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use rstar::{
    primitives::{GeomWithData, Rectangle},
    RTree,
};

/// Barycentric tolerance for points on triangle edges
const EDGE_TOLERANCE: f64 = 1e-10;

/// Size of the initial enclosing triangle relative to the point extent
const SUPER_TRIANGLE_SCALE: f64 = 100.;

/// Relative margin on the squared radius before a circumcircle is left behind by the sweep
const SWEEP_SLACK: f64 = 1e-9;

type TriangleEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

#[derive(Debug, Clone)]
pub struct Triangulation {
    pub points: Vec<[f64; 2]>,
    /// Counter-clockwise vertex indices into `points`
    pub triangles: Vec<[usize; 3]>,
    tree: RTree<TriangleEnvelope>,
}

#[derive(Debug, Clone, Copy)]
struct Circumcircle {
    x: f64,
    y: f64,
    r2: f64,
}

impl Circumcircle {
    fn new(a: &[f64; 2], b: &[f64; 2], c: &[f64; 2]) -> Self {
        let (bx, by) = (b[0] - a[0], b[1] - a[1]);
        let (cx, cy) = (c[0] - a[0], c[1] - a[1]);
        let d = 2. * (bx * cy - by * cx);
        if d == 0. {
            return Circumcircle { x: a[0], y: a[1], r2: f64::INFINITY };
        }
        let (b2, c2) = (bx * bx + by * by, cx * cx + cy * cy);
        let ux = (cy * b2 - by * c2) / d;
        let uy = (bx * c2 - cx * b2) / d;

        Circumcircle { x: a[0] + ux, y: a[1] + uy, r2: ux * ux + uy * uy }
    }

    /// Whether no point at or right of `x` can fall inside the circle
    fn left_of(&self, x: f64) -> bool {
        let dx = x - self.x;
        dx > 0. && dx * dx > self.r2 * (1. + SWEEP_SLACK)
    }
}

/// Twice the signed area of the triangle abc. Positive when counter-clockwise.
fn orient(a: &[f64; 2], b: &[f64; 2], c: &[f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Positive when `d` lies strictly inside the circumcircle of the counter-clockwise triangle abc.
fn in_circle(a: &[f64; 2], b: &[f64; 2], c: &[f64; 2], d: &[f64; 2]) -> f64 {
    let (adx, ady) = (a[0] - d[0], a[1] - d[1]);
    let (bdx, bdy) = (b[0] - d[0], b[1] - d[1]);
    let (cdx, cdy) = (c[0] - d[0], c[1] - d[1]);

    (adx * adx + ady * ady) * (bdx * cdy - cdx * bdy) - (bdx * bdx + bdy * bdy) * (adx * cdy - cdx * ady)
        + (cdx * cdx + cdy * cdy) * (adx * bdy - bdx * ady)
}

fn ccw(vertices: &[[f64; 2]], a: usize, b: usize, c: usize) -> Option<[usize; 3]> {
    let o = orient(&vertices[a], &vertices[b], &vertices[c]);
    if o > 0. {
        Some([a, b, c])
    } else if o < 0. {
        Some([a, c, b])
    } else {
        None
    }
}

/// Counter-clockwise convex hull of points sorted by (x, y), without collinear edge points
fn convex_hull(points: &[[f64; 2]], sorted: &[usize]) -> Vec<usize> {
    let half = |order: &mut dyn Iterator<Item = usize>| {
        let mut chain: Vec<usize> = Vec::new();
        for i in order {
            while chain.len() >= 2
                && orient(&points[chain[chain.len() - 2]], &points[chain[chain.len() - 1]], &points[i]) <= 0.
            {
                chain.pop();
            }
            chain.push(i);
        }
        chain.pop();
        chain
    };

    let mut hull = half(&mut sorted.iter().copied());
    hull.extend(half(&mut sorted.iter().rev().copied()));
    hull
}

/// Whether `q` lies inside or on the counter-clockwise triangle abc
fn covers(points: &[[f64; 2]], [a, b, c]: [usize; 3], q: usize) -> bool {
    let q = &points[q];
    orient(&points[a], &points[b], q) >= 0. && orient(&points[b], &points[c], q) >= 0. && orient(&points[c], &points[a], q) >= 0.
}

/// Triangulate a simple counter-clockwise polygon by clipping ears.
///
/// Collinear vertices are dropped without a triangle. Stops early if no ear can be found.
fn ear_clip(points: &[[f64; 2]], mut polygon: Vec<usize>) -> Vec<[usize; 3]> {
    let mut ears = Vec::new();

    while polygon.len() >= 3 {
        let m = polygon.len();
        let clipped = (0..m).find_map(|k| {
            let (a, b, c) = (polygon[(k + m - 1) % m], polygon[k], polygon[(k + 1) % m]);
            let o = orient(&points[a], &points[b], &points[c]);
            if o == 0. {
                return Some((k, None));
            }
            if o < 0. {
                return None;
            }
            let blocked = polygon.iter().any(|&q| q != a && q != b && q != c && covers(points, [a, b, c], q));
            (!blocked).then_some((k, Some([a, b, c])))
        });

        match clipped {
            Some((k, ear)) => {
                ears.extend(ear);
                polygon.remove(k);
            }
            None => break,
        }
    }
    ears
}

fn signed_area(points: &[[f64; 2]], polygon: &[usize]) -> f64 {
    let m = polygon.len();
    (0..m)
        .map(|k| {
            let (a, b) = (&points[polygon[k]], &points[polygon[(k + 1) % m]]);
            a[0] * b[1] - b[0] * a[1]
        })
        .sum::<f64>()
        * 0.5
}

/// Triangles that cover the parts of the convex hull left out of `triangles`.
///
/// Triangles that touch the enclosing super triangle are dropped after the insertion, which can
/// leave thin pockets along a nearly straight hull. Each pocket lies between consecutive hull
/// vertices that are still on the triangulation boundary and is filled by ear clipping.
fn fill_pockets(points: &[[f64; 2]], triangles: &[[usize; 3]], hull: &[usize]) -> Vec<[usize; 3]> {
    if hull.len() < 3 {
        return Vec::new();
    }
    if triangles.is_empty() {
        return ear_clip(points, hull.to_vec());
    }

    let directed = triangles
        .iter()
        .flat_map(|t| [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])])
        .collect::<HashSet<(usize, usize)>>();

    // Counter-clockwise boundary successor of each boundary vertex. None if it has several.
    let mut next: HashMap<usize, Option<usize>> = HashMap::new();
    for &(a, b) in &directed {
        if !directed.contains(&(b, a)) {
            next.entry(a).and_modify(|e| *e = None).or_insert(Some(b));
        }
    }

    let anchors = (0..hull.len()).filter(|&k| next.contains_key(&hull[k])).collect::<Vec<usize>>();

    let mut filled = Vec::new();
    for (j, &start) in anchors.iter().enumerate() {
        let end = anchors[(j + 1) % anchors.len()];
        let (u, v) = (hull[start], hull[end]);
        let lost = (1..hull.len())
            .map(|s| (start + s) % hull.len())
            .take_while(|&k| k != end)
            .map(|k| hull[k])
            .collect::<Vec<usize>>();

        let mut chain = vec![u];
        let reached = loop {
            let last = chain[chain.len() - 1];
            match next.get(&last).copied().flatten() {
                Some(b) if b == v => break true,
                Some(b) if chain.len() <= next.len() => chain.push(b),
                _ => break false,
            }
        };
        if !reached || (lost.is_empty() && chain.len() == 1) {
            continue;
        }

        let mut polygon = vec![u];
        polygon.extend(&lost);
        if v != u {
            polygon.push(v);
        }
        polygon.extend(chain[1..].iter().rev());

        if signed_area(points, &polygon) > 0. {
            filled.extend(ear_clip(points, polygon));
        }
    }
    filled
}

fn index(points: &[[f64; 2]], triangles: &[[usize; 3]]) -> RTree<TriangleEnvelope> {
    let leaves = triangles
        .iter()
        .enumerate()
        .map(|(idx, t)| {
            let (mut lower, mut upper) = ([f64::MAX; 2], [f64::MIN; 2]);
            for &v in t {
                for dim in 0..2 {
                    lower[dim] = lower[dim].min(points[v][dim]);
                    upper[dim] = upper[dim].max(points[v][dim]);
                }
            }
            let pad = EDGE_TOLERANCE * (upper[0] - lower[0] + upper[1] - lower[1]);
            let envelope = Rectangle::from_corners([lower[0] - pad, lower[1] - pad], [upper[0] + pad, upper[1] + pad]);
            GeomWithData::new(envelope, idx)
        })
        .collect::<Vec<TriangleEnvelope>>();

    RTree::bulk_load(leaves)
}

impl Triangulation {
    /// Triangulate a set of points.
    ///
    /// Non-finite points and exact duplicates of an earlier point are not inserted. Fewer than
    /// three usable, non-collinear points give an empty triangulation. Points are inserted in
    /// order of x so that triangles whose circumcircle the sweep has passed are never tested again.
    pub fn new(points: &[[f64; 2]]) -> Self {
        let n = points.len();
        let mut usable = (0..n)
            .filter(|&i| points[i][0].is_finite() && points[i][1].is_finite())
            .collect::<Vec<usize>>();
        usable.sort_by(|&a, &b| {
            points[a][0]
                .partial_cmp(&points[b][0])
                .unwrap_or(Ordering::Equal)
                .then(points[a][1].partial_cmp(&points[b][1]).unwrap_or(Ordering::Equal))
                .then(a.cmp(&b))
        });
        usable.dedup_by(|later, earlier| points[*later] == points[*earlier]);

        if usable.len() < 3 {
            return Triangulation { points: points.to_vec(), triangles: Vec::new(), tree: RTree::new() };
        }

        let (mut xmin, mut xmax, mut ymin, mut ymax) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for &i in &usable {
            xmin = xmin.min(points[i][0]);
            xmax = xmax.max(points[i][0]);
            ymin = ymin.min(points[i][1]);
            ymax = ymax.max(points[i][1]);
        }
        let extent = (xmax - xmin).max(ymax - ymin).max(1.);
        let (xmid, ymid) = (0.5 * (xmin + xmax), 0.5 * (ymin + ymax));

        let mut vertices = points.to_vec();
        vertices.push([xmid - SUPER_TRIANGLE_SCALE * extent, ymid - extent * SUPER_TRIANGLE_SCALE]);
        vertices.push([xmid + SUPER_TRIANGLE_SCALE * extent, ymid - extent * SUPER_TRIANGLE_SCALE]);
        vertices.push([xmid, ymid + SUPER_TRIANGLE_SCALE * extent]);

        let circle = |t: &[usize; 3]| Circumcircle::new(&vertices[t[0]], &vertices[t[1]], &vertices[t[2]]);

        let mut open: Vec<([usize; 3], Circumcircle)> = vec![([n, n + 1, n + 2], circle(&[n, n + 1, n + 2]))];
        let mut completed: Vec<[usize; 3]> = Vec::new();
        let mut edges: Vec<(usize, usize)> = Vec::new();

        for &i in &usable {
            let p = vertices[i];
            edges.clear();

            let mut k = 0;
            while k < open.len() {
                let (t, circumcircle) = open[k];
                if circumcircle.left_of(p[0]) {
                    completed.push(t);
                    open.swap_remove(k);
                } else if in_circle(&vertices[t[0]], &vertices[t[1]], &vertices[t[2]], &p) > 0. {
                    // Edges of the cavity that are not shared between two removed triangles
                    for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                        if let Some(pos) = edges.iter().position(|&(c, d)| c == b && d == a) {
                            edges.swap_remove(pos);
                        } else {
                            edges.push((a, b));
                        }
                    }
                    open.swap_remove(k);
                } else {
                    k += 1;
                }
            }

            for t in edges.iter().filter_map(|&(a, b)| ccw(&vertices, a, b, i)) {
                open.push((t, circle(&t)));
            }
        }

        let mut triangles = completed;
        triangles.extend(open.into_iter().map(|(t, _)| t));
        triangles.retain(|t| t.iter().all(|&v| v < n));

        let hull = convex_hull(points, &usable);
        let pockets = fill_pockets(points, &triangles, &hull);
        triangles.extend(pockets);

        let tree = index(points, &triangles);
        Triangulation { points: points.to_vec(), triangles, tree }
    }

    fn barycentric(&self, idx: usize, p: &[f64; 2]) -> Option<[f64; 3]> {
        let t = self.triangles[idx];
        let (a, b, c) = (&self.points[t[0]], &self.points[t[1]], &self.points[t[2]]);

        let det = (b[1] - c[1]) * (a[0] - c[0]) + (c[0] - b[0]) * (a[1] - c[1]);
        if det == 0. {
            return None;
        }
        let l1 = ((b[1] - c[1]) * (p[0] - c[0]) + (c[0] - b[0]) * (p[1] - c[1])) / det;
        let l2 = ((c[1] - a[1]) * (p[0] - c[0]) + (a[0] - c[0]) * (p[1] - c[1])) / det;
        let l3 = 1. - l1 - l2;

        (l1 >= -EDGE_TOLERANCE && l2 >= -EDGE_TOLERANCE && l3 >= -EDGE_TOLERANCE).then_some([l1, l2, l3])
    }

    /// Find the triangle that contains `p` and its barycentric coordinates.
    ///
    /// On a shared edge, the triangle with the lowest index wins.
    pub fn locate(&self, p: &[f64; 2]) -> Option<(usize, [f64; 3])> {
        self.tree
            .locate_all_at_point(p)
            .filter_map(|leaf| self.barycentric(leaf.data, p).map(|weights| (leaf.data, weights)))
            .min_by_key(|(idx, _)| *idx)
    }

    /// Linearly interpolate `values` (one per point) at `p`. `NaN` outside of the convex hull.
    pub fn interpolate(&self, values: &[f64], p: &[f64; 2]) -> f64 {
        match self.locate(p) {
            Some((idx, weights)) => {
                let t = self.triangles[idx];
                weights[0] * values[t[0]] + weights[1] * values[t[1]] + weights[2] * values[t[2]]
            }
            None => f64::NAN,
        }
    }
}
