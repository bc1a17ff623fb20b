//! Weighted k-means++ / Lloyd clustering for codebook training.
//!
//! One instance clusters the projections of the training set onto a single
//! subspace; [`super::codebook`] runs one per subspace in parallel. The
//! optional per-point weights implement anisotropic training: a point's
//! weight scales its pull on centroid means, its seeding probability and
//! its residual in empty-cluster reseeding, so error parallel to likely
//! queries can be penalized more than perpendicular error.

use crate::simd;

/// Deterministic xorshift64 PRNG.
///
/// Training must be reproducible given a seed, so no global randomness.
pub(crate) struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            // xorshift has a fixed point at zero
            state: if seed == 0 { 0x5DEE_CE66_D1A4_B5B5 } else { seed },
        }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform draw in `[0, 1)`.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform draw in `[0, bound)`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn next_bounded(&mut self, bound: usize) -> usize {
        debug_assert!(bound > 0);
        (self.next_f64() * bound as f64) as usize % bound
    }
}

/// Result of one clustering run.
pub(crate) struct Kmeans {
    /// `k * dim` centroid coordinates, row per centroid.
    pub centroids: Vec<f32>,
    /// Centroid index per training point.
    pub assignments: Vec<u32>,
}

/// Clusters `points` (packed rows of `dim` floats) into `k` centroids.
///
/// Runs k-means++ seeding then Lloyd iterations until `max_iters` or no
/// assignment changes. Distance ties go to the lowest centroid index. Empty
/// clusters are reseeded from the point with the largest (weighted)
/// residual to its current centroid.
pub(crate) fn train(
    points: &[f32],
    dim: usize,
    k: usize,
    max_iters: usize,
    weights: Option<&[f32]>,
    seed: u64,
) -> Kmeans {
    let count = points.len() / dim;
    debug_assert!(count >= k, "need at least k training points");
    debug_assert!(weights.is_none_or(|w| w.len() == count));

    let mut rng = XorShift64::new(seed);
    let mut centroids = seed_plus_plus(points, dim, count, k, weights, &mut rng);
    let mut assignments = vec![u32::MAX; count];

    for _ in 0..max_iters {
        let changes = assign(points, dim, count, k, &centroids, &mut assignments);
        recompute(points, dim, count, k, weights, &assignments, &mut centroids);
        reseed_empty(points, dim, count, k, weights, &mut assignments, &mut centroids);
        if changes == 0 {
            break;
        }
    }
    // Final assignment against the last centroid update
    assign(points, dim, count, k, &centroids, &mut assignments);

    Kmeans {
        centroids,
        assignments,
    }
}

fn point(points: &[f32], dim: usize, i: usize) -> &[f32] {
    &points[i * dim..(i + 1) * dim]
}

fn seed_plus_plus(
    points: &[f32],
    dim: usize,
    count: usize,
    k: usize,
    weights: Option<&[f32]>,
    rng: &mut XorShift64,
) -> Vec<f32> {
    let mut centroids = Vec::with_capacity(k * dim);
    let first = rng.next_bounded(count);
    centroids.extend_from_slice(point(points, dim, first));

    // Weighted squared distance of each point to its nearest chosen centroid
    let weight_of = |i: usize| weights.map_or(1.0, |w| w[i]);
    let mut dist2: Vec<f64> = (0..count)
        .map(|i| {
            f64::from(simd::squared_l2(point(points, dim, i), point(points, dim, first)))
                * f64::from(weight_of(i))
        })
        .collect();

    for _ in 1..k {
        let total: f64 = dist2.iter().sum();
        let chosen = if total <= 0.0 {
            // All mass already covered; fall back to uniform
            rng.next_bounded(count)
        } else {
            let mut target = rng.next_f64() * total;
            let mut pick = count - 1;
            for (i, &d) in dist2.iter().enumerate() {
                target -= d;
                if target <= 0.0 {
                    pick = i;
                    break;
                }
            }
            pick
        };
        let chosen_point = point(points, dim, chosen).to_vec();
        for i in 0..count {
            let d = f64::from(simd::squared_l2(point(points, dim, i), &chosen_point))
                * f64::from(weight_of(i));
            if d < dist2[i] {
                dist2[i] = d;
            }
        }
        centroids.extend_from_slice(&chosen_point);
    }
    centroids
}

/// Reassigns every point to its nearest centroid; returns the change count.
fn assign(
    points: &[f32],
    dim: usize,
    count: usize,
    k: usize,
    centroids: &[f32],
    assignments: &mut [u32],
) -> usize {
    let mut changes = 0;
    for i in 0..count {
        let p = point(points, dim, i);
        let mut best = 0u32;
        let mut best_d = f32::INFINITY;
        for c in 0..k {
            let d = simd::squared_l2(p, &centroids[c * dim..(c + 1) * dim]);
            // Strict < keeps the lowest centroid index on ties
            if d < best_d {
                best_d = d;
                best = u32::try_from(c).expect("centroid count fits in u32");
            }
        }
        if assignments[i] != best {
            assignments[i] = best;
            changes += 1;
        }
    }
    changes
}

fn recompute(
    points: &[f32],
    dim: usize,
    count: usize,
    k: usize,
    weights: Option<&[f32]>,
    assignments: &[u32],
    centroids: &mut [f32],
) {
    let mut sums = vec![0.0f64; k * dim];
    let mut mass = vec![0.0f64; k];
    for i in 0..count {
        let c = assignments[i] as usize;
        let w = f64::from(weights.map_or(1.0, |w| w[i]));
        mass[c] += w;
        let p = point(points, dim, i);
        for (slot, &x) in sums[c * dim..(c + 1) * dim].iter_mut().zip(p) {
            *slot += w * f64::from(x);
        }
    }
    for c in 0..k {
        if mass[c] > 0.0 {
            for d in 0..dim {
                #[allow(clippy::cast_possible_truncation)]
                let mean = (sums[c * dim + d] / mass[c]) as f32;
                centroids[c * dim + d] = mean;
            }
        }
        // Empty clusters are handled by reseed_empty
    }
}

fn reseed_empty(
    points: &[f32],
    dim: usize,
    count: usize,
    k: usize,
    weights: Option<&[f32]>,
    assignments: &mut [u32],
    centroids: &mut [f32],
) {
    let mut members = vec![0usize; k];
    for &a in assignments.iter() {
        members[a as usize] += 1;
    }
    for c in 0..k {
        if members[c] > 0 {
            continue;
        }
        // Steal the point with the largest weighted residual to its centroid
        let mut worst = 0usize;
        let mut worst_d = -1.0f32;
        for i in 0..count {
            let home = assignments[i] as usize;
            if members[home] <= 1 {
                continue;
            }
            let d = simd::squared_l2(point(points, dim, i), &centroids[home * dim..(home + 1) * dim])
                * weights.map_or(1.0, |w| w[i]);
            if d > worst_d {
                worst_d = d;
                worst = i;
            }
        }
        let old = assignments[worst] as usize;
        members[old] -= 1;
        members[c] += 1;
        assignments[worst] = u32::try_from(c).expect("centroid count fits in u32");
        centroids[c * dim..(c + 1) * dim].copy_from_slice(point(points, dim, worst));
    }
}
