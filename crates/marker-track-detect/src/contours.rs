//! Connected components, outer-boundary tracing and small polygon geometry.
//!
//! Coordinates are integer pixel centres in patch-local space.

use std::collections::VecDeque;

/// 8-neighbourhood in clockwise order (y grows downwards), starting west.
const RING: [(i32, i32); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

fn ring_index(dx: i32, dy: i32) -> usize {
    RING.iter()
        .position(|&d| d == (dx, dy))
        .unwrap_or(0)
}

/// 8-connected component labels (`0` = background, components start at 1).
pub struct Components {
    pub width: usize,
    pub height: usize,
    pub labels: Vec<u32>,
    pub count: u32,
    /// Raster-first pixel of each component, indexed by `label - 1`.
    pub seeds: Vec<(i32, i32)>,
}

impl Components {
    #[inline]
    fn label_at(&self, x: i32, y: i32) -> u32 {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return 0;
        }
        self.labels[y as usize * self.width + x as usize]
    }

    /// Pixel count per component, indexed by `label - 1`.
    pub fn areas(&self) -> Vec<usize> {
        let mut areas = vec![0usize; self.count as usize];
        for &l in &self.labels {
            if l > 0 {
                areas[l as usize - 1] += 1;
            }
        }
        areas
    }

    /// Outer boundary of component `label`, traced clockwise.
    pub fn outer_contour(&self, label: u32) -> Vec<(i32, i32)> {
        let Some(&start) = self.seeds.get(label as usize - 1) else {
            return Vec::new();
        };
        trace_outer(start, |x, y| self.label_at(x, y) == label)
    }

    /// Outer contours of every component, in label order.
    pub fn contours(&self) -> Vec<Vec<(i32, i32)>> {
        (1..=self.count).map(|l| self.outer_contour(l)).collect()
    }
}

pub fn label_components(mask: &[bool], width: usize, height: usize) -> Components {
    let mut labels = vec![0u32; mask.len()];
    let mut seeds = Vec::new();
    let mut queue = VecDeque::new();
    let mut next = 0u32;

    for start in 0..mask.len() {
        if !mask[start] || labels[start] != 0 {
            continue;
        }
        next += 1;
        labels[start] = next;
        seeds.push(((start % width) as i32, (start / width) as i32));
        queue.push_back(start);
        while let Some(i) = queue.pop_front() {
            let (x, y) = ((i % width) as i64, (i / width) as i64);
            for &(dx, dy) in &RING {
                let (nx, ny) = (x + dx as i64, y + dy as i64);
                if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                    continue;
                }
                let j = ny as usize * width + nx as usize;
                if mask[j] && labels[j] == 0 {
                    labels[j] = next;
                    queue.push_back(j);
                }
            }
        }
    }

    Components {
        width,
        height,
        labels,
        count: next,
        seeds,
    }
}

/// Moore-neighbour boundary tracing from the raster-first pixel of a region.
///
/// Stops when the walk re-enters `start` heading towards the second boundary
/// pixel again.
fn trace_outer(start: (i32, i32), inside: impl Fn(i32, i32) -> bool) -> Vec<(i32, i32)> {
    let mut contour = vec![start];
    let mut p = start;
    // The raster-first pixel always has background to its west.
    let mut back = 0usize;
    let mut second: Option<(i32, i32)> = None;
    let limit = 1usize << 24;

    for _ in 0..limit {
        let mut next = None;
        for step in 1..=8 {
            let k = (back + step) % 8;
            let c = (p.0 + RING[k].0, p.1 + RING[k].1);
            if inside(c.0, c.1) {
                let prev = (RING[(k + 7) % 8].0, RING[(k + 7) % 8].1);
                next = Some((c, ring_index(prev.0 - RING[k].0, prev.1 - RING[k].1)));
                break;
            }
        }
        let Some((c, new_back)) = next else {
            // Isolated pixel.
            return contour;
        };
        if p == start {
            match second {
                None => second = Some(c),
                Some(s) if s == c => {
                    contour.pop();
                    return contour;
                }
                Some(_) => {}
            }
        }
        contour.push(c);
        p = c;
        back = new_back;
    }
    contour
}

/// Shoelace area of a closed polygon (always non-negative).
pub fn polygon_area(pts: &[(i32, i32)]) -> f64 {
    if pts.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..pts.len() {
        let (x0, y0) = pts[i];
        let (x1, y1) = pts[(i + 1) % pts.len()];
        acc += x0 as f64 * y1 as f64 - x1 as f64 * y0 as f64;
    }
    0.5 * acc.abs()
}

/// Length of the closed polygon.
pub fn polygon_perimeter(pts: &[(i32, i32)]) -> f64 {
    if pts.len() < 2 {
        return 0.0;
    }
    (0..pts.len())
        .map(|i| {
            let (x0, y0) = pts[i];
            let (x1, y1) = pts[(i + 1) % pts.len()];
            ((x1 - x0) as f64).hypot((y1 - y0) as f64)
        })
        .sum()
}

/// Convex hull by monotone chain, counter-clockwise, without repeated ends.
pub fn convex_hull(pts: &[(i32, i32)]) -> Vec<(i32, i32)> {
    let mut p: Vec<(i32, i32)> = pts.to_vec();
    p.sort_unstable();
    p.dedup();
    if p.len() < 3 {
        return p;
    }
    let cross = |o: (i32, i32), a: (i32, i32), b: (i32, i32)| -> i64 {
        (a.0 - o.0) as i64 * (b.1 - o.1) as i64 - (a.1 - o.1) as i64 * (b.0 - o.0) as i64
    };
    let mut hull: Vec<(i32, i32)> = Vec::with_capacity(2 * p.len());
    for &pt in &p {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], pt) <= 0 {
            hull.pop();
        }
        hull.push(pt);
    }
    let lower = hull.len() + 1;
    for &pt in p.iter().rev().skip(1) {
        while hull.len() >= lower && cross(hull[hull.len() - 2], hull[hull.len() - 1], pt) <= 0 {
            hull.pop();
        }
        hull.push(pt);
    }
    hull.pop();
    hull
}

/// Spatial moments of a closed polygon up to second order.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolygonMoments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m11: f64,
    pub m02: f64,
}

impl PolygonMoments {
    pub fn centroid(&self) -> Option<(f64, f64)> {
        (self.m00 > 0.0).then(|| (self.m10 / self.m00, self.m01 / self.m00))
    }

    /// Minor-to-major inertia ratio; 1 for rotationally symmetric shapes.
    pub fn inertia_ratio(&self) -> f64 {
        let Some((cx, cy)) = self.centroid() else {
            return 0.0;
        };
        let mu20 = self.m20 / self.m00 - cx * cx;
        let mu02 = self.m02 / self.m00 - cy * cy;
        let mu11 = self.m11 / self.m00 - cx * cy;
        let denom = ((2.0 * mu11).powi(2) + (mu20 - mu02).powi(2)).sqrt();
        if denom <= 0.01 {
            return 1.0;
        }
        let cos = (mu20 - mu02) / denom;
        let sin = 2.0 * mu11 / denom;
        let i_min = 0.5 * (mu20 + mu02) - 0.5 * (mu20 - mu02) * cos - mu11 * sin;
        let i_max = 0.5 * (mu20 + mu02) + 0.5 * (mu20 - mu02) * cos + mu11 * sin;
        if i_max <= 0.0 {
            return 0.0;
        }
        i_min / i_max
    }
}

/// Green's-theorem moments of the polygon outlined by `pts`.
pub fn polygon_moments(pts: &[(i32, i32)]) -> PolygonMoments {
    let mut m = PolygonMoments::default();
    if pts.len() < 3 {
        return m;
    }
    for i in 0..pts.len() {
        let (x0, y0) = (pts[i].0 as f64, pts[i].1 as f64);
        let j = (i + 1) % pts.len();
        let (x1, y1) = (pts[j].0 as f64, pts[j].1 as f64);
        let a = x0 * y1 - x1 * y0;
        m.m00 += a;
        m.m10 += a * (x0 + x1);
        m.m01 += a * (y0 + y1);
        m.m20 += a * (x0 * x0 + x0 * x1 + x1 * x1);
        m.m11 += a * (x0 * (2.0 * y0 + y1) + x1 * (y0 + 2.0 * y1));
        m.m02 += a * (y0 * y0 + y0 * y1 + y1 * y1);
    }
    let sign = if m.m00 < 0.0 { -1.0 } else { 1.0 };
    PolygonMoments {
        m00: sign * m.m00 / 2.0,
        m10: sign * m.m10 / 6.0,
        m01: sign * m.m01 / 6.0,
        m20: sign * m.m20 / 12.0,
        m11: sign * m.m11 / 24.0,
        m02: sign * m.m02 / 12.0,
    }
}

/// Visiting order `i * step mod n` with `step` near `n / φ` and coprime to `n`.
///
/// Consecutive contour points are spatial neighbours, the worst input order
/// for the incremental circle; the stride scatters them deterministically.
fn scattered_order(n: usize) -> impl Iterator<Item = usize> {
    fn gcd(a: usize, b: usize) -> usize {
        if b == 0 { a } else { gcd(b, a % b) }
    }
    let mut step = ((n as f64 * 0.618_033_988_75) as usize).max(1);
    while n > 1 && gcd(step, n) != 1 {
        step += 1;
    }
    (0..n).map(move |i| (i * step) % n.max(1))
}

/// Smallest circle containing every point, as `(cx, cy, radius)`.
///
/// Only hull vertices can lie on the circle, so the incremental (Welzl)
/// construction runs over the convex hull in scattered order.
pub fn min_enclosing_circle(pts: &[(i32, i32)]) -> Option<(f64, f64, f64)> {
    let hull = convex_hull(pts);
    let p: Vec<(f64, f64)> = scattered_order(hull.len())
        .map(|i| (hull[i].0 as f64, hull[i].1 as f64))
        .collect();
    let first = *p.first()?;
    const EPS: f64 = 1e-7;
    let contains = |c: (f64, f64, f64), q: (f64, f64)| {
        (q.0 - c.0).hypot(q.1 - c.1) <= c.2 + EPS
    };

    let mut c = (first.0, first.1, 0.0);
    for i in 1..p.len() {
        if contains(c, p[i]) {
            continue;
        }
        c = (p[i].0, p[i].1, 0.0);
        for j in 0..i {
            if contains(c, p[j]) {
                continue;
            }
            c = circle_from_two(p[i], p[j]);
            for k in 0..j {
                if !contains(c, p[k]) {
                    c = circle_from_three(p[i], p[j], p[k]);
                }
            }
        }
    }
    Some(c)
}

fn circle_from_two(a: (f64, f64), b: (f64, f64)) -> (f64, f64, f64) {
    let cx = 0.5 * (a.0 + b.0);
    let cy = 0.5 * (a.1 + b.1);
    (cx, cy, 0.5 * (a.0 - b.0).hypot(a.1 - b.1))
}

fn circle_from_three(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> (f64, f64, f64) {
    let (bx, by) = (b.0 - a.0, b.1 - a.1);
    let (cx, cy) = (c.0 - a.0, c.1 - a.1);
    let d = 2.0 * (bx * cy - by * cx);
    if d.abs() < 1e-12 {
        // Collinear: the widest pair spans the circle.
        let pairs = [circle_from_two(a, b), circle_from_two(a, c), circle_from_two(b, c)];
        return pairs
            .into_iter()
            .fold((0.0, 0.0, -1.0), |best, p| if p.2 > best.2 { p } else { best });
    }
    let b2 = bx * bx + by * by;
    let c2 = cx * cx + cy * cy;
    let ux = (cy * b2 - by * c2) / d;
    let uy = (bx * c2 - cx * b2) / d;
    (a.0 + ux, a.1 + uy, ux.hypot(uy))
}
