use log::{debug, info};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};

use crate::*;

#[inline]
/// Squared Euclidean distance between two descriptors.
pub fn sq_dist(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).fold(0., |acc, (x, y)| {
        let d = x - y;
        acc + d * d
    })
}

/// Index of and squared distance to the centroid nearest to `x`.
///
/// Ties go to the lowest centroid index.
pub fn nearest(x: ArrayView1<f32>, centroids: ArrayView2<f32>) -> (usize, f32) {
    let mut best: (usize, f32) = (0, f32::INFINITY);
    for (j, c) in centroids.rows().into_iter().enumerate() {
        let d = sq_dist(x, c);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

/// Nearest centroid of every row of `data`.
pub fn assign(data: ArrayView2<f32>, centroids: ArrayView2<f32>) -> Vec<usize> {
    data.rows()
        .into_iter()
        .map(|x| nearest(x, centroids).0)
        .collect()
}

/// Mean squared distance of the rows of `data` to their nearest centroid.
pub fn inertia(data: ArrayView2<f32>, centroids: ArrayView2<f32>) -> f64 {
    if data.nrows() == 0 {
        return 0.;
    }
    let sum: f64 = data
        .rows()
        .into_iter()
        .map(|x| f64::from(nearest(x, centroids).1))
        .sum();
    sum / data.nrows() as f64
}

/// k-means++ seeding: first centroid uniformly at random, the rest with
/// probability proportional to the squared distance to the closest centroid
/// chosen so far. `data` must have at least one row.
pub fn kmeans_plusplus<R: Rng>(data: ArrayView2<f32>, k: usize, rng: &mut R) -> Array2<f32> {
    let n = data.nrows();
    let mut centroids = Array2::zeros((k, data.ncols()));
    if k == 0 || n == 0 {
        return centroids;
    }
    centroids.row_mut(0).assign(&data.row(rng.gen_range(0..n)));
    let mut dists: Vec<f64> = data
        .rows()
        .into_iter()
        .map(|x| f64::from(sq_dist(x, centroids.row(0))))
        .collect();

    for c in 1..k {
        let total: f64 = dists.iter().sum();
        let pick = if total > 0. {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &d) in dists.iter().enumerate() {
                if target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            // every row coincides with a centroid already
            rng.gen_range(0..n)
        };
        centroids.row_mut(c).assign(&data.row(pick));
        for (i, x) in data.rows().into_iter().enumerate() {
            let d = f64::from(sq_dist(x, centroids.row(c)));
            if d < dists[i] {
                dists[i] = d;
            }
        }
    }
    centroids
}

/// Cluster the rows of `data` into `k` centroids with mini-batch k-means.
///
/// Seeding is k-means++ on a random subsample of `3 * batch` rows. Each step
/// draws `batch = batch_factor * k` rows and moves every row's nearest
/// centroid towards it with learning rate `1 / count`, where `count` is the
/// number of rows that centroid has absorbed so far. The result depends only
/// on `data`, `k` and `params` (the seed included).
pub fn minibatch_kmeans(
    data: ArrayView2<f32>,
    k: usize,
    params: &KMeansParams,
) -> VocabResult<Array2<f32>> {
    let n = data.nrows();
    if k == 0 {
        return Err(VocabErr::InvalidParameter(
            "number of clusters must be positive".into(),
        ));
    }
    if n < k {
        return Err(VocabErr::InsufficientData {
            available: n,
            requested: k,
        });
    }

    let batch = (params.batch_factor.max(1) * k).min(n);
    let mut rng = StdRng::seed_from_u64(params.seed);

    let init_size = (3 * batch).max(k).min(n);
    let init_rows = index::sample(&mut rng, n, init_size).into_vec();
    let mut centroids = kmeans_plusplus(data.select(Axis(0), &init_rows).view(), k, &mut rng);

    let mut counts = vec![0usize; k];
    let steps = (params.max_iter.max(1) * n + batch - 1) / batch;
    let alpha = (2. * batch as f64 / (n as f64 + 1.)).min(1.);
    let mut ewa_inertia: Option<f64> = None;
    let mut best = f64::INFINITY;
    let mut no_improvement = 0;

    for step in 0..steps {
        let mut batch_inertia = 0.;
        for _ in 0..batch {
            let x = data.row(rng.gen_range(0..n));
            let (j, d) = nearest(x, centroids.view());
            batch_inertia += f64::from(d);
            counts[j] += 1;
            let eta = 1. / counts[j] as f32;
            centroids
                .row_mut(j)
                .zip_mut_with(&x, |c, &v| *c += eta * (v - *c));
        }
        batch_inertia /= batch as f64;

        let smoothed = match ewa_inertia {
            Some(prev) => prev * (1. - alpha) + batch_inertia * alpha,
            None => batch_inertia,
        };
        ewa_inertia = Some(smoothed);
        debug!(
            "Minibatch step {}/{}: inertia {:.4}, smoothed {:.4}",
            step + 1,
            steps,
            batch_inertia,
            smoothed
        );

        if smoothed < best {
            best = smoothed;
            no_improvement = 0;
        } else {
            no_improvement += 1;
            if no_improvement >= params.max_no_improvement {
                debug!("No improvement for {} steps, stopping at step {}", no_improvement, step + 1);
                break;
            }
        }
    }

    info!(
        "KMeans with {} descriptors, k = {}, batch = {}: inertia {:.4}",
        n,
        k,
        batch,
        inertia(data, centroids.view())
    );
    Ok(centroids)
}
