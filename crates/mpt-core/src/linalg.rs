//! Dense linear-algebra helpers for the small (N <= 10) matrices the engine works with.

/// Matrix-vector multiplication: result_i = sum_j(mat[i][j] * v[j]).
pub(crate) fn mat_vec_multiply(mat: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    mat.iter().map(|row| vec_dot(row, v)).collect()
}

/// Dot product of two vectors.
pub(crate) fn vec_dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Quadratic form w' * M * w.
pub(crate) fn quadratic_form(w: &[f64], mat: &[Vec<f64>]) -> f64 {
    vec_dot(w, &mat_vec_multiply(mat, w))
}

/// Cholesky factor L (lower triangular, A = L * L'). Returns `None` when the matrix is not
/// numerically positive definite.
#[allow(clippy::needless_range_loop)]
pub(crate) fn cholesky(mat: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = mat.len();
    let scale = (0..n).map(|i| mat[i][i].abs()).fold(0.0_f64, f64::max);
    let floor = scale * 1e-14;
    let mut l = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in 0..=i {
            let mut sum = mat[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= floor {
                    return None;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    Some(l)
}

/// Eigenvalues of a symmetric matrix by cyclic Jacobi rotations, sorted ascending.
#[allow(clippy::needless_range_loop)]
pub(crate) fn symmetric_eigenvalues(mat: &[Vec<f64>]) -> Vec<f64> {
    let n = mat.len();
    let mut a: Vec<Vec<f64>> = mat.to_vec();

    for _sweep in 0..100 {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        if off < 1e-30 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                if a[p][q].abs() < 1e-300 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let t = if theta == 0.0 { 1.0 } else { t };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[k][p];
                    let akq = a[k][q];
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p][k];
                    let aqk = a[q][k];
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
            }
        }
    }

    let mut eig: Vec<f64> = (0..n).map(|i| a[i][i]).collect();
    eig.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    eig
}

/// Percentile of a **sorted** slice using linear interpolation between order statistics
/// (rank = p/100 * (n - 1)).
pub(crate) fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

pub(crate) fn sort_ascending(values: &mut [f64]) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_dot() {
        assert_eq!(vec_dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
    }

    #[test]
    fn test_quadratic_form() {
        let m = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        // [1, 2] * M * [1, 2]' = 2 + 2*2 + 12 = 18
        assert!((quadratic_form(&[1.0, 2.0], &m) - 18.0).abs() < 1e-12);
    }

    #[test]
    fn test_cholesky_reconstructs() {
        let m = vec![vec![4.0, 2.0, 0.4], vec![2.0, 5.0, 1.0], vec![0.4, 1.0, 3.0]];
        let l = cholesky(&m).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let v: f64 = (0..3).map(|k| l[i][k] * l[j][k]).sum();
                assert!((v - m[i][j]).abs() < 1e-12, "L*L'[{i}][{j}] = {v}");
            }
        }
    }

    #[test]
    fn test_cholesky_rejects_singular() {
        let m = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        assert!(cholesky(&m).is_none());
    }

    #[test]
    fn test_eigenvalues_diagonal() {
        let m = vec![vec![3.0, 0.0], vec![0.0, 1.0]];
        let e = symmetric_eigenvalues(&m);
        assert!((e[0] - 1.0).abs() < 1e-12);
        assert!((e[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_eigenvalues_symmetric_2x2() {
        // [[2,1],[1,2]] has eigenvalues 1 and 3
        let m = vec![vec![2.0, 1.0], vec![1.0, 2.0]];
        let e = symmetric_eigenvalues(&m);
        assert!((e[0] - 1.0).abs() < 1e-10);
        assert!((e[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&v, 50.0), 3.0);
        assert!((percentile_sorted(&v, 10.0) - 1.4).abs() < 1e-12);
        assert_eq!(percentile_sorted(&v, 0.0), 1.0);
        assert_eq!(percentile_sorted(&v, 100.0), 5.0);
    }
}
