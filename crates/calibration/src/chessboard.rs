//! Chessboard inner-corner detection
//!
//! Corners are found with a ChESS ring response (16 samples on a radius-5
//! circle), refined to sub-pixel accuracy from image gradients, and then
//! assembled into the board lattice by growing a grid from a seed corner.

use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use nalgebra::{Matrix2, Point2, Point3, Vector2};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Ring radius of the corner response
const RING_RADIUS: i64 = 5;

/// 16 ring offsets, counter-clockwise from +x
const RING: [(i64, i64); 16] = [
    (5, 0), (5, 2), (4, 4), (2, 5),
    (0, 5), (-2, 5), (-4, 4), (-5, 2),
    (-5, 0), (-5, -2), (-4, -4), (-2, -5),
    (0, -5), (2, -5), (4, -4), (5, -2),
];

/// Minimum peak response for a board to be considered present
const MIN_PEAK_RESPONSE: f32 = 60.0;

/// Candidates below this share of the peak response are dropped
const RELATIVE_THRESHOLD: f32 = 0.15;

const NMS_RADIUS: i64 = 4;
const MAX_CANDIDATES: usize = 400;
const MAX_SEEDS: usize = 30;
const SUBPIX_HALF_WINDOW: i64 = 4;

/// Inner-corner grid of a chessboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardSize {
    /// Inner corners per row
    pub columns: usize,
    /// Inner corners per column
    pub rows: usize,
}

impl BoardSize {
    pub fn new(columns: usize, rows: usize) -> Self {
        Self { columns, rows }
    }

    pub fn corner_count(&self) -> usize {
        self.columns * self.rows
    }

    /// Planar object points, row-major, z = 0
    pub fn object_points(&self, square_size: f64) -> Vec<Point3<f64>> {
        let mut points = Vec::with_capacity(self.corner_count());
        for r in 0..self.rows {
            for c in 0..self.columns {
                points.push(Point3::new(c as f64 * square_size, r as f64 * square_size, 0.0));
            }
        }
        points
    }
}

impl Default for BoardSize {
    fn default() -> Self {
        Self::new(9, 6)
    }
}

/// Detected corners, row-major (`columns` corners per row)
#[derive(Debug, Clone)]
pub struct ChessboardCorners {
    pub board: BoardSize,
    pub points: Vec<Point2<f64>>,
}

impl ChessboardCorners {
    pub fn at(&self, column: usize, row: usize) -> Option<&Point2<f64>> {
        if column >= self.board.columns || row >= self.board.rows {
            return None;
        }
        self.points.get(row * self.board.columns + column)
    }
}

/// Dense f32 image plane
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_gray(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width: width as usize,
            height: height as usize,
            data: image.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    fn at(&self, x: i64, y: i64) -> f32 {
        self.data[y as usize * self.width + x as usize]
    }

    fn contains(&self, x: i64, y: i64, margin: i64) -> bool {
        x >= margin && y >= margin && x < self.width as i64 - margin && y < self.height as i64 - margin
    }

    fn gradient(&self, x: i64, y: i64) -> Vector2<f64> {
        let gx = (self.at(x + 1, y) - self.at(x - 1, y)) as f64 * 0.5;
        let gy = (self.at(x, y + 1) - self.at(x, y - 1)) as f64 * 0.5;
        Vector2::new(gx, gy)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    pos: Point2<f64>,
    response: f32,
}

/// Locate the inner corners of a chessboard of the given size
///
/// Returns `None` unless every corner of the board is found.
pub fn find_chessboard_corners(image: &GrayImage, board: BoardSize) -> Option<ChessboardCorners> {
    if board.columns < 2 || board.rows < 2 {
        return None;
    }
    let (width, height) = image.dimensions();
    if width <= 2 * RING_RADIUS as u32 + 2 || height <= 2 * RING_RADIUS as u32 + 2 {
        return None;
    }

    let plane = Plane::from_gray(&gaussian_blur_f32(image, 1.0));
    let response = ring_response(&plane);
    let candidates = corner_candidates(&plane, &response);
    debug!("{} corner candidates", candidates.len());

    if candidates.len() < board.corner_count() {
        return None;
    }

    let seeds = candidates.len().min(MAX_SEEDS);
    (0..seeds).find_map(|seed| assemble_grid(&candidates, seed, board))
}

/// ChESS response, zero outside the valid ring area
fn ring_response(plane: &Plane) -> Vec<f32> {
    let mut out = vec![0.0f32; plane.width * plane.height];
    for y in RING_RADIUS..plane.height as i64 - RING_RADIUS {
        for x in RING_RADIUS..plane.width as i64 - RING_RADIUS {
            let mut ring = [0.0f32; 16];
            for (v, (dx, dy)) in ring.iter_mut().zip(RING.iter()) {
                *v = plane.at(x + dx, y + dy);
            }

            let sum: f32 = (0..4)
                .map(|n| (ring[n] + ring[n + 8] - ring[n + 4] - ring[n + 12]).abs())
                .sum();
            let diff: f32 = (0..8).map(|n| (ring[n] - ring[n + 8]).abs()).sum();
            let ring_mean = ring.iter().sum::<f32>() / 16.0;
            let local_mean = (plane.at(x, y)
                + plane.at(x + 1, y)
                + plane.at(x - 1, y)
                + plane.at(x, y + 1)
                + plane.at(x, y - 1))
                / 5.0;

            out[y as usize * plane.width + x as usize] =
                sum - diff - 16.0 * (ring_mean - local_mean).abs();
        }
    }
    out
}

/// Non-maximum suppression followed by sub-pixel refinement
fn corner_candidates(plane: &Plane, response: &[f32]) -> Vec<Candidate> {
    let peak = response.iter().copied().fold(0.0f32, f32::max);
    if peak < MIN_PEAK_RESPONSE {
        return Vec::new();
    }
    let threshold = peak * RELATIVE_THRESHOLD;
    let w = plane.width as i64;
    let h = plane.height as i64;

    let mut candidates = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let r = response[(y * w + x) as usize];
            if r <= threshold {
                continue;
            }

            let mut is_max = true;
            'window: for ny in (y - NMS_RADIUS).max(0)..=(y + NMS_RADIUS).min(h - 1) {
                for nx in (x - NMS_RADIUS).max(0)..=(x + NMS_RADIUS).min(w - 1) {
                    if nx == x && ny == y {
                        continue;
                    }
                    let other = response[(ny * w + nx) as usize];
                    // Ties resolve to the first pixel in raster order
                    let earlier = (ny, nx) < (y, x);
                    if other > r || (earlier && other == r) {
                        is_max = false;
                        break 'window;
                    }
                }
            }

            if is_max {
                let initial = Point2::new(x as f64, y as f64);
                candidates.push(Candidate {
                    pos: refine_subpixel(plane, initial).unwrap_or(initial),
                    response: r,
                });
            }
        }
    }

    candidates.sort_by(|a, b| b.response.total_cmp(&a.response));
    candidates.truncate(MAX_CANDIDATES);
    candidates
}

/// Gradient-orthogonality corner refinement
///
/// At a saddle every gradient in the window is orthogonal to the vector
/// from the corner to its pixel, giving a 2x2 linear system per step.
fn refine_subpixel(plane: &Plane, initial: Point2<f64>) -> Option<Point2<f64>> {
    let margin = SUBPIX_HALF_WINDOW + 1;
    let mut q = initial;

    for _ in 0..20 {
        let cx = q.x.round() as i64;
        let cy = q.y.round() as i64;
        if !plane.contains(cx, cy, margin) {
            return None;
        }

        let mut a = Matrix2::<f64>::zeros();
        let mut b = Vector2::<f64>::zeros();
        for y in cy - SUBPIX_HALF_WINDOW..=cy + SUBPIX_HALF_WINDOW {
            for x in cx - SUBPIX_HALF_WINDOW..=cx + SUBPIX_HALF_WINDOW {
                let g = plane.gradient(x, y);
                let ggt = g * g.transpose();
                a += ggt;
                b += ggt * Vector2::new(x as f64, y as f64);
            }
        }

        let next = a.try_inverse().map(|inv| inv * b)?;
        let next = Point2::new(next.x, next.y);
        let shift = (next - q).norm();
        q = next;
        if shift < 0.01 {
            break;
        }
    }

    if (q - initial).norm() > SUBPIX_HALF_WINDOW as f64 {
        return None;
    }
    Some(q)
}

fn nearest(candidates: &[Candidate], target: &Point2<f64>, max_dist: f64) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, (c.pos - target).norm()))
        .filter(|(_, d)| *d <= max_dist)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

#[derive(Debug, Clone, Copy)]
struct GridNode {
    candidate: usize,
    u: Vector2<f64>,
    v: Vector2<f64>,
}

/// Grow a lattice from `seed` and map it onto the board
fn assemble_grid(candidates: &[Candidate], seed: usize, board: BoardSize) -> Option<ChessboardCorners> {
    let origin = candidates[seed].pos;

    let mut neighbours: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != seed)
        .map(|(i, c)| (i, (c.pos - origin).norm()))
        .collect();
    neighbours.sort_by(|a, b| a.1.total_cmp(&b.1));

    let (first, first_dist) = *neighbours.first()?;
    let u = candidates[first].pos - origin;
    let v = neighbours.iter().skip(1).find_map(|&(i, d)| {
        let dir = candidates[i].pos - origin;
        let cos = u.dot(&dir) / (first_dist * d).max(f64::EPSILON);
        (cos.abs() < 0.5 && d < 2.0 * first_dist).then_some(dir)
    })?;

    let max_extent = board.columns.max(board.rows) as i64;
    let mut grid: HashMap<(i64, i64), GridNode> = HashMap::new();
    let mut used = vec![false; candidates.len()];
    let mut queue = VecDeque::new();

    grid.insert((0, 0), GridNode { candidate: seed, u, v });
    used[seed] = true;
    queue.push_back((0i64, 0i64));

    let (mut min_i, mut max_i, mut min_j, mut max_j) = (0i64, 0i64, 0i64, 0i64);

    while let Some((i, j)) = queue.pop_front() {
        let node = grid[&(i, j)];
        let base = candidates[node.candidate].pos;

        for (di, dj) in [(1i64, 0i64), (-1, 0), (0, 1), (0, -1)] {
            let key = (i + di, j + dj);
            if grid.contains_key(&key) {
                continue;
            }
            let (ni, nj) = key;
            if ni.max(max_i) - ni.min(min_i) + 1 > max_extent
                || nj.max(max_j) - nj.min(min_j) + 1 > max_extent
            {
                continue;
            }

            let predicted = base + node.u * di as f64 + node.v * dj as f64;
            let tolerance = 0.35 * node.u.norm().min(node.v.norm());
            let Some(found) = nearest(candidates, &predicted, tolerance) else {
                continue;
            };
            if used[found] {
                continue;
            }

            let step = candidates[found].pos - base;
            let child = GridNode {
                candidate: found,
                u: if di != 0 { step * di as f64 } else { node.u },
                v: if dj != 0 { step * dj as f64 } else { node.v },
            };
            used[found] = true;
            grid.insert(key, child);
            queue.push_back(key);
            min_i = min_i.min(ni);
            max_i = max_i.max(ni);
            min_j = min_j.min(nj);
            max_j = max_j.max(nj);
        }
    }

    if grid.len() != board.corner_count() {
        return None;
    }

    let extent_i = (max_i - min_i + 1) as usize;
    let extent_j = (max_j - min_j + 1) as usize;
    let transpose = if (extent_i, extent_j) == (board.columns, board.rows) {
        false
    } else if (extent_i, extent_j) == (board.rows, board.columns) {
        true
    } else {
        return None;
    };

    let mut points = vec![Point2::origin(); board.corner_count()];
    for (&(i, j), node) in &grid {
        let (a, b) = ((i - min_i) as usize, (j - min_j) as usize);
        let (col, row) = if transpose { (b, a) } else { (a, b) };
        points[row * board.columns + col] = candidates[node.candidate].pos;
    }

    Some(orient(ChessboardCorners { board, points }))
}

/// Put column 0 on the left and row 0 at the top
fn orient(mut corners: ChessboardCorners) -> ChessboardCorners {
    let BoardSize { columns, rows } = corners.board;
    let column_mean_x = |c: usize| {
        (0..rows).map(|r| corners.points[r * columns + c].x).sum::<f64>() / rows as f64
    };
    let row_mean_y = |r: usize| {
        (0..columns).map(|c| corners.points[r * columns + c].y).sum::<f64>() / columns as f64
    };

    let flip_columns = column_mean_x(0) > column_mean_x(columns - 1);
    let flip_rows = row_mean_y(0) > row_mean_y(rows - 1);

    if flip_columns || flip_rows {
        let original = corners.points.clone();
        for r in 0..rows {
            for c in 0..columns {
                let sr = if flip_rows { rows - 1 - r } else { r };
                let sc = if flip_columns { columns - 1 - c } else { c };
                corners.points[r * columns + c] = original[sr * columns + sc];
            }
        }
    }
    corners
}
