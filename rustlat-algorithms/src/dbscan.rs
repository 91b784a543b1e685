//! Grid-accelerated DBSCAN for 3D point clouds.
//!
//! Points are hashed into a uniform grid whose cell width equals the
//! largest supported clustering radius, so a region query only ever
//! touches the 27 bins around a point. The bin array is a fixed-capacity
//! arena addressed by index; bins are cleared between calls while the
//! arena itself persists.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::missing_panics_doc
)]

use nalgebra::Vector3;
use rustlat_core::{Error, Result};

/// A cluster is the set of input point indices it contains.
pub type Cluster = Vec<u32>;

/// Density clustering over a preallocated spatial grid.
///
/// The grid is sized at construction for a maximum radius and a maximum
/// point norm; `compute_clusters` may then be called repeatedly with any
/// `epsilon <= max_epsilon`.
#[derive(Debug)]
pub struct DbscanClustering {
    max_epsilon: f64,
    bin_width_reciprocal: f64,
    bins_per_dimension: i64,
    bin_origin: f64,
    strides: [i64; 3],
    neighbor_offsets: [i64; 27],
    bin_count: usize,
}

/// Reusable grid and scratch buffers for [`DbscanClustering`].
#[derive(Debug, Default)]
pub struct DbscanState {
    bins: Vec<Bin>,
    used_bins: Vec<usize>,
    main_neighborhood: Vec<Neighbor>,
    region_scratch: Vec<Neighbor>,
}

/// One grid cell. Points are stored redundantly (not just their
/// indices) to keep the distance comparisons cache-friendly.
#[derive(Debug, Default, Clone)]
struct Bin {
    points: Vec<Vector3<f64>>,
    point_indices: Vec<u32>,
    visited: Vec<bool>,
    is_member: Vec<bool>,
    visited_and_member: Vec<bool>,
}

/// Index-based handle to a point sitting in a bin slot.
#[derive(Debug, Clone, Copy)]
struct Neighbor {
    bin: usize,
    slot: usize,
}

impl DbscanClustering {
    /// Creates a clusterer supporting radii up to `max_epsilon` for
    /// points with coordinates bounded by `max_point_norm`.
    #[must_use]
    pub fn new(max_epsilon: f64, max_point_norm: f64) -> Self {
        let bin_width = max_epsilon;
        // One extra border ring of always-empty bins keeps the 27-bin
        // offset arithmetic in bounds without per-bin range checks.
        let bins_per_dimension = 2 * (max_point_norm / bin_width).ceil() as i64 + 3;
        let strides = [
            1,
            bins_per_dimension,
            bins_per_dimension * bins_per_dimension,
        ];

        let mut neighbor_offsets = [0i64; 27];
        let mut offset_index = 1;
        for x in -1i64..=1 {
            for y in -1i64..=1 {
                for z in -1i64..=1 {
                    if x == 0 && y == 0 && z == 0 {
                        continue;
                    }
                    neighbor_offsets[offset_index] = x + y * strides[1] + z * strides[2];
                    offset_index += 1;
                }
            }
        }

        Self {
            max_epsilon,
            bin_width_reciprocal: 1.0 / bin_width,
            bins_per_dimension,
            bin_origin: -(bins_per_dimension as f64) / 2.0 * bin_width,
            strides,
            neighbor_offsets,
            bin_count: (bins_per_dimension * bins_per_dimension * bins_per_dimension) as usize,
        }
    }

    /// Creates a state with the grid arena preallocated.
    #[must_use]
    pub fn create_state(&self) -> DbscanState {
        DbscanState {
            bins: vec![Bin::default(); self.bin_count],
            used_bins: Vec::with_capacity(64),
            main_neighborhood: Vec::with_capacity(256),
            region_scratch: Vec::with_capacity(256),
        }
    }

    /// The largest radius this grid supports.
    #[must_use]
    pub fn max_epsilon(&self) -> f64 {
        self.max_epsilon
    }

    /// Computes the density clusters of `points` for the given radius
    /// and density threshold.
    ///
    /// Cluster membership is a pure function of
    /// `(points, min_points, epsilon)`; points whose neighborhoods never
    /// reach `min_points` stay unclustered.
    ///
    /// # Errors
    /// `Error::InvalidParameter` if `epsilon` exceeds the grid's fixed
    /// maximum or `min_points` is zero.
    pub fn compute_clusters(
        &self,
        state: &mut DbscanState,
        points: &[Vector3<f64>],
        min_points: usize,
        epsilon: f64,
    ) -> Result<Vec<Cluster>> {
        if epsilon > self.max_epsilon {
            return Err(Error::InvalidParameter {
                name: "epsilon",
                value: epsilon,
                limit: self.max_epsilon,
            });
        }
        if min_points == 0 {
            return Err(Error::InvalidParameter {
                name: "min_points",
                value: 0.0,
                limit: 1.0,
            });
        }
        if state.bins.len() != self.bin_count {
            *state = self.create_state();
        }

        let squared_epsilon = epsilon * epsilon;
        self.fill_grid(state, points);

        let mut clusters: Vec<Cluster> = Vec::with_capacity(32);

        for used_index in 0..state.used_bins.len() {
            let bin_index = state.used_bins[used_index];
            for slot in 0..state.bins[bin_index].points.len() {
                if state.bins[bin_index].visited[slot] {
                    continue;
                }
                let seed = Neighbor {
                    bin: bin_index,
                    slot,
                };
                mark_visited(&mut state.bins, seed);

                state.main_neighborhood.clear();
                let neighbor_count = region_query(
                    &state.bins,
                    &self.neighbor_offsets,
                    squared_epsilon,
                    seed,
                    &mut state.main_neighborhood,
                );
                if neighbor_count >= min_points {
                    let mut cluster = Cluster::with_capacity(8);
                    expand_cluster(
                        &mut state.bins,
                        &self.neighbor_offsets,
                        squared_epsilon,
                        min_points,
                        seed,
                        &mut state.main_neighborhood,
                        &mut state.region_scratch,
                        &mut cluster,
                    );
                    clusters.push(cluster);
                }
            }
        }

        clear_grid(state);
        Ok(clusters)
    }

    fn fill_grid(&self, state: &mut DbscanState, points: &[Vector3<f64>]) {
        for (point_index, point) in points.iter().enumerate() {
            let bin_index = self.bin_index(point);
            let bin = &mut state.bins[bin_index];
            if bin.points.is_empty() {
                state.used_bins.push(bin_index);
            }
            bin.points.push(*point);
            bin.point_indices.push(point_index as u32);
        }
        // Seed scan order follows grid bin order, then in-bin order.
        state.used_bins.sort_unstable();

        for &bin_index in &state.used_bins {
            let bin = &mut state.bins[bin_index];
            let count = bin.points.len();
            bin.visited.resize(count, false);
            bin.is_member.resize(count, false);
            bin.visited_and_member.resize(count, false);
        }
    }

    fn bin_index(&self, point: &Vector3<f64>) -> usize {
        let mut index = 0i64;
        for dimension in 0..3 {
            let relative = (point[dimension] - self.bin_origin) * self.bin_width_reciprocal;
            // Clamping to the inner region keeps the border ring empty
            // even for points beyond the advertised maximum norm.
            let cell = (relative.floor() as i64).clamp(1, self.bins_per_dimension - 2);
            index += cell * self.strides[dimension];
        }
        index as usize
    }
}

fn mark_visited(bins: &mut [Bin], at: Neighbor) {
    let bin = &mut bins[at.bin];
    bin.visited[at.slot] = true;
    bin.visited_and_member[at.slot] = bin.is_member[at.slot];
}

fn mark_member(bins: &mut [Bin], at: Neighbor) {
    let bin = &mut bins[at.bin];
    bin.is_member[at.slot] = true;
    bin.visited_and_member[at.slot] = bin.visited[at.slot];
}

/// Collects every point within `squared_epsilon` of `origin` from the 27
/// surrounding bins into `neighborhood` (skipping points already both
/// visited and claimed), returning the total count of in-range points.
fn region_query(
    bins: &[Bin],
    neighbor_offsets: &[i64; 27],
    squared_epsilon: f64,
    origin: Neighbor,
    neighborhood: &mut Vec<Neighbor>,
) -> usize {
    let origin_position = bins[origin.bin].points[origin.slot];
    let mut in_range_count = 0;

    for &offset in neighbor_offsets {
        let bin_index = (origin.bin as i64 + offset) as usize;
        let bin = &bins[bin_index];
        for (slot, position) in bin.points.iter().enumerate() {
            if (origin_position - position).norm_squared() <= squared_epsilon {
                in_range_count += 1;
                if !bin.visited_and_member[slot] {
                    neighborhood.push(Neighbor {
                        bin: bin_index,
                        slot,
                    });
                }
            }
        }
    }

    in_range_count
}

#[allow(clippy::too_many_arguments)]
fn expand_cluster(
    bins: &mut [Bin],
    neighbor_offsets: &[i64; 27],
    squared_epsilon: f64,
    min_points: usize,
    seed: Neighbor,
    worklist: &mut Vec<Neighbor>,
    region_scratch: &mut Vec<Neighbor>,
    cluster: &mut Cluster,
) {
    cluster.push(bins[seed.bin].point_indices[seed.slot]);
    mark_member(bins, seed);

    let mut next = 0;
    while next < worklist.len() {
        let current = worklist[next];
        next += 1;

        if !bins[current.bin].visited[current.slot] {
            mark_visited(bins, current);
            region_scratch.clear();
            let neighbor_count = region_query(
                bins,
                neighbor_offsets,
                squared_epsilon,
                current,
                region_scratch,
            );
            if neighbor_count >= min_points {
                worklist.extend_from_slice(region_scratch);
            }
        }
        if !bins[current.bin].is_member[current.slot] {
            cluster.push(bins[current.bin].point_indices[current.slot]);
            mark_member(bins, current);
        }
    }
}

fn clear_grid(state: &mut DbscanState) {
    for &bin_index in &state.used_bins {
        let bin = &mut state.bins[bin_index];
        bin.points.clear();
        bin.point_indices.clear();
        bin.visited.clear();
        bin.is_member.clear();
        bin.visited_and_member.clear();
    }
    state.used_bins.clear();
}
