use active_matter_common::{Particle, SimParams};
use rayon::prelude::*;

/// Uniform cell decomposition of the domain, rebuilt from scratch every step.
///
/// Cells are stored compactly: `cell_particle_indices` holds every particle
/// index grouped by cell, `cell_starts[c]` is the offset of cell `c` in that
/// list and `cell_counts[c]` its length. Cell `c = row * n_cols + col`.
/// Indices inside a cell are ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    n_cols: usize,
    n_rows: usize,
    cell_width: f64,
    cell_height: f64,
    cell_counts: Vec<u32>,
    cell_starts: Vec<u32>,
    cell_particle_indices: Vec<u32>,
}

// Cells scanned in addition to the cell itself: left, up-left, up, up-right.
// Together with the opposite half seen from the other side, every pair of
// adjacent cells is visited exactly once.
const HALF_STENCIL: [(isize, isize); 4] = [(-1, 0), (-1, -1), (0, -1), (1, -1)];

// Calculates the 1D grid cell index for a given position
#[inline(always)]
pub fn get_grid_cell_idx(
    particle: &Particle,
    cell_width: f64,
    cell_height: f64,
    n_cols: usize,
    n_rows: usize,
) -> usize {
    let col = (particle.x / cell_width).floor() as usize;
    let row = (particle.y / cell_height).floor() as usize;
    // x / cell_width can round up to n_cols for x just below the width
    let clamped_col = col.min(n_cols - 1);
    let clamped_row = row.min(n_rows - 1);
    clamped_row * n_cols + clamped_col
}

impl Grid {
    /// Assigns every particle to the cell `(floor(x / cell_width), floor(y / cell_height))`.
    ///
    /// Positions are expected in `[0, n_cols * cell_width) x [0, n_rows * cell_height)`.
    pub fn build(
        particles: &[Particle],
        cell_width: f64,
        cell_height: f64,
        n_cols: usize,
        n_rows: usize,
    ) -> Grid {
        let num_cells = n_cols * n_rows;

        // Phase 1: Assign grid indices to each particle (Parallel).
        let particle_cells: Vec<usize> = particles
            .par_iter()
            .map(|p| get_grid_cell_idx(p, cell_width, cell_height, n_cols, n_rows))
            .collect();

        // Phase 2: Count particles in each grid cell (Serial).
        let mut cell_counts = vec![0u32; num_cells];
        for &cell in &particle_cells {
            cell_counts[cell] += 1;
        }

        // Phase 3: Cell start indices from a prefix sum over the counts.
        let mut cell_starts = vec![0u32; num_cells];
        let mut total = 0u32;
        for (start, &count) in cell_starts.iter_mut().zip(&cell_counts) {
            *start = total;
            total += count;
        }

        // Phase 4: Scatter particle indices into their cell blocks. Serial, so
        // each block stays in ascending index order.
        let mut write_offsets = cell_starts.clone();
        let mut cell_particle_indices = vec![0u32; particles.len()];
        for (idx, &cell) in particle_cells.iter().enumerate() {
            let slot = &mut write_offsets[cell];
            cell_particle_indices[*slot as usize] = idx as u32;
            *slot += 1;
        }

        Grid {
            n_cols,
            n_rows,
            cell_width,
            cell_height,
            cell_counts,
            cell_starts,
            cell_particle_indices,
        }
    }

    /// Builds the grid using the geometry of `params`.
    pub fn for_params(particles: &[Particle], params: &SimParams) -> Grid {
        Self::build(
            particles,
            params.cell_width,
            params.cell_height,
            params.n_cols,
            params.n_rows,
        )
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn cell_width(&self) -> f64 {
        self.cell_width
    }

    pub fn cell_height(&self) -> f64 {
        self.cell_height
    }

    pub fn num_cells(&self) -> usize {
        self.n_cols * self.n_rows
    }

    /// Number of particles stored in the grid.
    pub fn len(&self) -> usize {
        self.cell_particle_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_particle_indices.is_empty()
    }

    /// Particle indices in cell `(col, row)`.
    #[inline(always)]
    pub fn cell(&self, col: usize, row: usize) -> &[u32] {
        let cell = row * self.n_cols + col;
        let start = self.cell_starts[cell] as usize;
        let end = start + self.cell_counts[cell] as usize;
        &self.cell_particle_indices[start..end]
    }

    /// `(col, row)` of the cell containing particle `index`, if the grid holds it.
    pub fn cell_of(&self, index: u32) -> Option<(usize, usize)> {
        let pos = self.cell_particle_indices.iter().position(|&i| i == index)?;
        // The last cell whose block starts at or before `pos` owns it; empty
        // cells share their start with the next cell, so skip those.
        let cell = (0..self.num_cells())
            .rev()
            .find(|&c| self.cell_counts[c] > 0 && self.cell_starts[c] as usize <= pos)?;
        Some((cell % self.n_cols, cell / self.n_cols))
    }

    /// Cell column holding `col`, wrapped once, with the x shift to apply to
    /// particles of that column so they are seen from the unwrapped side.
    #[inline(always)]
    pub(crate) fn wrap_col(&self, col: isize, width: f64) -> (usize, f64) {
        wrap_index(col, self.n_cols, width)
    }

    #[inline(always)]
    pub(crate) fn wrap_row(&self, row: isize, height: f64) -> (usize, f64) {
        wrap_index(row, self.n_rows, height)
    }
}

/// Wraps a possibly out-of-range cell index onto the grid. Returns the wrapped
/// index and the position shift (a whole number of periods) that maps a
/// particle of the wrapped cell to the image adjacent to the requested one.
#[inline(always)]
pub(crate) fn wrap_index(index: isize, n: usize, period: f64) -> (usize, f64) {
    let n = n as isize;
    let wraps = index.div_euclid(n);
    (index.rem_euclid(n) as usize, wraps as f64 * period)
}

/// Calls `f(i, j, dx, dy, r2)` once for every unordered pair of particles in
/// the same or adjacent cells (with periodic wrap) whose squared separation is
/// below `max_dist_sq`. `(dx, dy)` points from `i` to the image of `j` nearest
/// across the scanned seam.
///
/// Exactly-once holds when the grid has at least 3 columns and 3 rows; on
/// narrower grids a pair may additionally meet through a second image.
#[inline(always)]
pub fn for_each_pair_within<F>(
    particles: &[Particle],
    grid: &Grid,
    params: &SimParams,
    max_dist_sq: f64,
    mut f: F,
) where
    F: FnMut(usize, usize, f64, f64, f64),
{
    for row in 0..grid.n_rows() {
        for col in 0..grid.n_cols() {
            let cell = grid.cell(col, row);
            if cell.is_empty() {
                continue;
            }

            // Pairs inside the cell, each once.
            for (a, &i) in cell.iter().enumerate() {
                let p1 = &particles[i as usize];
                for &j in &cell[a + 1..] {
                    let p2 = &particles[j as usize];
                    let dx = p2.x - p1.x;
                    let dy = p2.y - p1.y;
                    let r2 = dx * dx + dy * dy;
                    if r2 < max_dist_sq {
                        f(i as usize, j as usize, dx, dy, r2);
                    }
                }
            }

            // Pairs with the preceding half of the neighborhood.
            for (dc, dr) in HALF_STENCIL {
                let (ncol, shift_x) = grid.wrap_col(col as isize + dc, params.width);
                let (nrow, shift_y) = grid.wrap_row(row as isize + dr, params.height);
                let neighbor = grid.cell(ncol, nrow);
                for &i in cell {
                    let p1 = &particles[i as usize];
                    for &j in neighbor {
                        let p2 = &particles[j as usize];
                        let dx = p2.x + shift_x - p1.x;
                        let dy = p2.y + shift_y - p1.y;
                        let r2 = dx * dx + dy * dy;
                        if r2 < max_dist_sq {
                            f(i as usize, j as usize, dx, dy, r2);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use active_matter_common::Dynamics;

    fn params(width: f64, height: f64) -> SimParams {
        let dynamics = Dynamics { speed: 0.0, k: 1.0, position_noise: 0.0, angular_noise: 0.0, dt: 0.1 };
        SimParams::with_dimensions(width, height, 0.1, &dynamics, 0).unwrap()
    }

    #[test]
    fn particles_land_in_floor_cells() {
        let params = params(5.0, 4.0);
        let particles = vec![
            Particle::new(0.5, 0.5, 0.0),
            Particle::new(4.99, 3.99, 0.0),
            Particle::new(2.0, 1.0, 0.0),
            Particle::new(2.7, 1.2, 0.0),
        ];
        let grid = Grid::for_params(&particles, &params);
        assert_eq!(grid.cell(0, 0), &[0]);
        assert_eq!(grid.cell(4, 3), &[1]);
        assert_eq!(grid.cell(2, 1), &[2, 3]);
        assert_eq!(grid.cell_of(3), Some((2, 1)));
        assert_eq!(grid.len(), 4);
    }

    #[test]
    fn edge_position_is_clamped_into_last_cell() {
        let params = params(3.0, 3.0);
        let particles = vec![Particle::new(3.0 - 1e-16, 3.0 - 1e-16, 0.0)];
        let grid = Grid::for_params(&particles, &params);
        assert_eq!(grid.cell_of(0), Some((2, 2)));
    }

    #[test]
    fn wrap_index_reports_period_shift() {
        assert_eq!(wrap_index(-1, 10, 10.0), (9, -10.0));
        assert_eq!(wrap_index(10, 10, 10.0), (0, 10.0));
        assert_eq!(wrap_index(4, 10, 10.0), (4, 0.0));
    }

    #[test]
    fn scan_finds_pairs_across_both_seams_once() {
        let params = params(6.0, 6.0);
        let particles = vec![
            Particle::new(0.1, 0.1, 0.0),
            Particle::new(5.9, 5.9, 0.0), // diagonal image of particle 0
            Particle::new(3.0, 3.0, 0.0),
            Particle::new(3.5, 3.0, 0.0),
        ];
        let grid = Grid::for_params(&particles, &params);
        let mut pairs = Vec::new();
        for_each_pair_within(&particles, &grid, &params, 1.0, |i, j, dx, dy, r2| {
            pairs.push((i.min(j), i.max(j), dx, dy, r2));
        });
        pairs.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        assert_eq!(pairs.len(), 2);
        assert_eq!((pairs[0].0, pairs[0].1), (0, 1));
        assert!((pairs[0].4 - 0.08).abs() < 1e-12);
        assert_eq!((pairs[1].0, pairs[1].1), (2, 3));
        assert!((pairs[1].4 - 0.25).abs() < 1e-12);
    }

    #[test]
    fn scan_visits_every_close_pair_exactly_once() {
        use rand::prelude::*;
        let params = params(8.0, 7.0);
        let mut rng = StdRng::seed_from_u64(11);
        let particles: Vec<Particle> = (0..120)
            .map(|_| Particle::new(rng.random::<f64>() * 8.0, rng.random::<f64>() * 7.0, 0.0))
            .collect();
        let grid = Grid::for_params(&particles, &params);

        let mut seen = std::collections::HashMap::new();
        for_each_pair_within(&particles, &grid, &params, 1.0, |i, j, _, _, _| {
            *seen.entry((i.min(j), i.max(j))).or_insert(0) += 1;
        });

        // Brute force with minimum-image distances.
        let mut expected = 0;
        for i in 0..particles.len() {
            for j in i + 1..particles.len() {
                let mut dx = (particles[j].x - particles[i].x).abs();
                let mut dy = (particles[j].y - particles[i].y).abs();
                dx = dx.min(8.0 - dx);
                dy = dy.min(7.0 - dy);
                if dx * dx + dy * dy < 1.0 {
                    expected += 1;
                    assert_eq!(seen.get(&(i, j)), Some(&1), "pair ({i}, {j})");
                }
            }
        }
        assert_eq!(seen.len(), expected);
    }
}
