//! Dense vector reductions used by the eigenvalue iteration.

/// Σ v
pub fn sum(v: &[f64]) -> f64 {
    v.iter().sum()
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn norm2(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

pub fn scale(v: &mut [f64], factor: f64) {
    for x in v.iter_mut() {
        *x *= factor;
    }
}

/// Root-mean-square of the relative change `(new - old) / old`, skipping
/// entries where `old` is zero. Returns 0 when every entry is skipped.
pub fn relative_rms_change(new: &[f64], old: &[f64]) -> f64 {
    let mut accum = 0.0;
    let mut count = 0usize;
    for (&n, &o) in new.iter().zip(old.iter()) {
        if o != 0.0 {
            let rel = (n - o) / o;
            accum += rel * rel;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    (accum / count as f64).sqrt()
}

/// L2 norm of `b - A x` relative to `‖b‖` (absolute if `b` is zero).
pub fn relative_residual(a: &crate::sparse::CsrMatrix, x: &[f64], b: &[f64]) -> f64 {
    let mut ax = vec![0.0; b.len()];
    a.mul_vec(x, &mut ax);
    let r: f64 = ax
        .iter()
        .zip(b.iter())
        .map(|(axi, bi)| (bi - axi) * (bi - axi))
        .sum::<f64>()
        .sqrt();
    let nb = norm2(b);
    if nb > 0.0 {
        r / nb
    } else {
        r
    }
}
