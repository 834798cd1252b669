// SPDX-License-Identifier: GPL-3.0-only

//! Chessboard presence check
//!
//! The capture loop only needs to know whether a calibration target of the
//! configured layout is fully visible before saving a pair; refining corner
//! positions is the solver's job. [`ChessGridDetector`] finds X-junctions with
//! the ChESS response, links them into lattices by stepping along the local
//! grid axes, and accepts a frame when one lattice is exactly rows × columns
//! (in either orientation) with every corner present.

use image::{GrayImage, RgbImage, imageops};
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// Inner-corner layout of a chessboard target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternSize {
    pub rows: u32,
    pub columns: u32,
}

impl PatternSize {
    pub fn new(rows: u32, columns: u32) -> Self {
        Self { rows, columns }
    }

    pub fn corner_count(&self) -> usize {
        self.rows as usize * self.columns as usize
    }
}

/// Answers whether a chessboard is visible in a frame
pub trait ChessboardDetector: Send {
    fn find(&mut self, frame: &RgbImage, pattern: PatternSize) -> bool;
}

/// 16-sample ring of radius 5, rotated half a step off the axes so every
/// sample falls cleanly inside one quadrant around a pixel-corner junction
const RING: [(i32, i32); 16] = [
    (5, 1),
    (4, 3),
    (3, 4),
    (1, 5),
    (-1, 5),
    (-3, 4),
    (-4, 3),
    (-5, 1),
    (-5, -1),
    (-4, -3),
    (-3, -4),
    (-1, -5),
    (1, -5),
    (3, -4),
    (4, -3),
    (5, -1),
];

const RING_RADIUS: u32 = 5;
const SUPPRESSION_RADIUS: i32 = 3;

/// Neighbors farther than this multiple of the nearest one are not grid steps
const MAX_STEP_RATIO: f32 = 1.3;
/// Largest |cos| between the two seed axes
const ORTHOGONAL_COS: f32 = 0.5;
/// A corner snaps to a predicted lattice position within this share of a step
const SNAP_RATIO: f32 = 0.3;

type Point = (f32, f32);

/// ChESS corners assembled into a lattice and matched against the pattern
#[derive(Debug, Clone)]
pub struct ChessGridDetector {
    /// Minimum response for a pixel to count as a corner
    pub threshold: i32,
    /// Frames wider than this are downscaled first
    pub max_width: u32,
}

impl Default for ChessGridDetector {
    fn default() -> Self {
        Self {
            threshold: 128,
            max_width: 640,
        }
    }
}

impl ChessGridDetector {
    fn prepare(&self, frame: &RgbImage) -> GrayImage {
        let gray = imageops::grayscale(frame);
        if gray.width() <= self.max_width {
            return gray;
        }
        let height = (gray.height() as u64 * self.max_width as u64 / gray.width() as u64) as u32;
        imageops::resize(
            &gray,
            self.max_width,
            height.max(1),
            imageops::FilterType::Triangle,
        )
    }

    /// ChESS response: high where opposite ring quadrants agree and adjacent
    /// ones differ
    fn response(gray: &GrayImage, x: u32, y: u32) -> i32 {
        let sample = |(dx, dy): (i32, i32)| -> i32 {
            gray.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32).0[0] as i32
        };
        let ring: [i32; 16] = RING.map(sample);

        let sum_response: i32 = (0..4)
            .map(|n| ((ring[n] + ring[n + 8]) - (ring[n + 4] + ring[n + 12])).abs())
            .sum();
        let diff_response: i32 = (0..8).map(|n| (ring[n] - ring[n + 8]).abs()).sum();

        let ring_mean = ring.iter().sum::<i32>() as f32 / 16.0;
        let mut local = 0i32;
        for dy in -1..=1 {
            for dx in -1..=1 {
                local += sample((dx, dy));
            }
        }
        let mean_response = (ring_mean - local as f32 / 9.0).abs();

        sum_response - diff_response - (16.0 * mean_response) as i32
    }

    /// Corner positions after thresholding and non-maximum suppression, in
    /// detection-image pixels
    pub fn corners(&self, frame: &RgbImage) -> Vec<Point> {
        let gray = self.prepare(frame);
        let (width, height) = gray.dimensions();
        let margin = RING_RADIUS + 1;
        if width <= 2 * margin || height <= 2 * margin {
            return Vec::new();
        }

        let w = width as usize;
        let mut responses = vec![i32::MIN; w * height as usize];
        for y in margin..height - margin {
            for x in margin..width - margin {
                responses[y as usize * w + x as usize] = Self::response(&gray, x, y);
            }
        }

        let mut corners = Vec::new();
        for y in margin..height - margin {
            for x in margin..width - margin {
                let value = responses[y as usize * w + x as usize];
                if value > self.threshold && is_local_max(&responses, w, x, y, value) {
                    corners.push((x as f32, y as f32));
                }
            }
        }
        corners
    }
}

/// Strict maximum against earlier neighbors in raster order, non-strict
/// against later ones, so a flat plateau yields exactly one winner
fn is_local_max(responses: &[i32], width: usize, x: u32, y: u32, value: i32) -> bool {
    let height = (responses.len() / width) as i32;
    for dy in -SUPPRESSION_RADIUS..=SUPPRESSION_RADIUS {
        for dx in -SUPPRESSION_RADIUS..=SUPPRESSION_RADIUS {
            if dx == 0 && dy == 0 {
                continue;
            }
            let (nx, ny) = (x as i32 + dx, y as i32 + dy);
            if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height {
                continue;
            }
            let other = responses[ny as usize * width + nx as usize];
            let earlier = dy < 0 || (dy == 0 && dx < 0);
            if other > value || (earlier && other == value) {
                return false;
            }
        }
    }
    true
}

/// Size of one assembled lattice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridExtent {
    pub columns: u32,
    pub rows: u32,
    /// Occupied lattice positions
    pub corners: usize,
}

impl GridExtent {
    fn single() -> Self {
        Self {
            columns: 1,
            rows: 1,
            corners: 1,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.corners == self.columns as usize * self.rows as usize
    }

    /// Complete and shaped like `pattern`, transposed or not
    pub fn matches(&self, pattern: PatternSize) -> bool {
        let shape = (self.rows, self.columns);
        self.is_complete()
            && (shape == (pattern.rows, pattern.columns)
                || shape == (pattern.columns, pattern.rows))
    }
}

fn offset(from: Point, to: Point) -> Point {
    (to.0 - from.0, to.1 - from.1)
}

fn length(v: Point) -> f32 {
    v.0.hypot(v.1)
}

fn scaled(v: Point, factor: f32) -> Point {
    (v.0 * factor, v.1 * factor)
}

fn nearest_within(points: &[Point], target: Point, tolerance: f32) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .map(|(index, &p)| (index, length(offset(target, p))))
        .filter(|&(_, distance)| distance <= tolerance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(index, _)| index)
}

/// Step vectors at `seed`: toward its nearest corner, and toward the nearest
/// roughly perpendicular one
fn seed_axes(points: &[Point], seed: usize) -> Option<(Point, Point)> {
    let origin = points[seed];
    let mut steps: Vec<(f32, Point)> = points
        .iter()
        .enumerate()
        .filter(|&(index, _)| index != seed)
        .map(|(_, &p)| {
            let step = offset(origin, p);
            (length(step), step)
        })
        .collect();
    steps.sort_by(|a, b| a.0.total_cmp(&b.0));

    let &(spacing, u) = steps.first()?;
    if spacing <= f32::EPSILON {
        return None;
    }
    let v = steps
        .iter()
        .take_while(|(distance, _)| *distance <= spacing * MAX_STEP_RATIO)
        .find(|(distance, w)| {
            ((u.0 * w.0 + u.1 * w.1) / (spacing * distance)).abs() < ORTHOGONAL_COS
        })
        .map(|&(_, w)| w)
        .unwrap_or((-u.1, u.0));
    Some((u, v))
}

/// Breadth-first walk from `seed`, predicting each neighbor one local step
/// away along either axis
///
/// Local axes are re-estimated from every accepted step so perspective
/// foreshortening is followed. `None` when a corner would land on two lattice
/// positions or two corners on one.
fn grow_grid(points: &[Point], seed: usize, visited: &mut [bool]) -> Option<GridExtent> {
    visited[seed] = true;
    let Some((u, v)) = seed_axes(points, seed) else {
        return Some(GridExtent::single());
    };

    let mut cells: HashMap<(i32, i32), usize> = HashMap::from([((0, 0), seed)]);
    let mut cell_of: HashMap<usize, (i32, i32)> = HashMap::from([(seed, (0, 0))]);
    let mut queue = VecDeque::from([(seed, u, v)]);
    let mut consistent = true;

    while let Some((current, u, v)) = queue.pop_front() {
        let (i, j) = cell_of[&current];
        let origin = points[current];
        let tolerance = SNAP_RATIO * length(u).min(length(v));

        let moves = [
            (1, 0, u),
            (-1, 0, scaled(u, -1.0)),
            (0, 1, v),
            (0, -1, scaled(v, -1.0)),
        ];
        for (di, dj, step) in moves {
            let predicted = (origin.0 + step.0, origin.1 + step.1);
            let Some(found) = nearest_within(points, predicted, tolerance) else {
                continue;
            };
            let cell = (i + di, j + dj);
            match (cell_of.get(&found), cells.get(&cell)) {
                (Some(&known), _) if known == cell => continue,
                (None, None) if !visited[found] => {}
                _ => {
                    consistent = false;
                    continue;
                }
            }

            visited[found] = true;
            cells.insert(cell, found);
            cell_of.insert(found, cell);
            let actual = offset(origin, points[found]);
            let axes = if di != 0 {
                (scaled(actual, di as f32), v)
            } else {
                (u, scaled(actual, dj as f32))
            };
            queue.push_back((found, axes.0, axes.1));
        }
    }

    if !consistent {
        return None;
    }
    let span = |axis: fn(&(i32, i32)) -> i32| {
        let (lo, hi) = cells
            .keys()
            .map(axis)
            .fold((i32::MAX, i32::MIN), |(lo, hi), k| (lo.min(k), hi.max(k)));
        (hi - lo + 1) as u32
    };
    Some(GridExtent {
        columns: span(|cell| cell.0),
        rows: span(|cell| cell.1),
        corners: cells.len(),
    })
}

/// Every consistent lattice among `points`
pub fn assemble_grids(points: &[Point]) -> Vec<GridExtent> {
    let mut visited = vec![false; points.len()];
    let mut grids = Vec::new();
    for seed in 0..points.len() {
        if visited[seed] {
            continue;
        }
        if let Some(grid) = grow_grid(points, seed, &mut visited) {
            grids.push(grid);
        }
    }
    grids
}

impl ChessboardDetector for ChessGridDetector {
    fn find(&mut self, frame: &RgbImage, pattern: PatternSize) -> bool {
        if pattern.corner_count() == 0 {
            return false;
        }
        let corners = self.corners(frame);
        if corners.len() < pattern.corner_count() {
            trace!(
                found = corners.len(),
                expected = pattern.corner_count(),
                "Too few corners"
            );
            return false;
        }
        let grids = assemble_grids(&corners);
        trace!(corners = corners.len(), ?grids, "Assembled chessboard lattices");
        grids.iter().any(|grid| grid.matches(pattern))
    }
}
