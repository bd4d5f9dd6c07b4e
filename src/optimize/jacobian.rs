use nalgebra::{DMatrix, DVector, SVD};

use crate::error::{ChainError, ChainResult};

/// Central-difference jacobian of `residual` at `x`, one column per parameter.
pub fn numerical_jacobian<F>(
    residual: &mut F,
    x: &DVector<f64>,
    step: f64,
) -> ChainResult<DMatrix<f64>>
where
    F: FnMut(&DVector<f64>) -> ChainResult<DVector<f64>>,
{
    let mut jacobian = DMatrix::zeros(0, x.len());
    let mut probe = x.clone();
    for i in 0..x.len() {
        probe[i] = x[i] + step;
        let plus = residual(&probe)?;
        probe[i] = x[i] - step;
        let minus = residual(&probe)?;
        probe[i] = x[i];
        if i == 0 {
            jacobian = DMatrix::zeros(plus.len(), x.len());
        }
        jacobian.set_column(i, &((plus - minus) / (2. * step)));
    }
    Ok(jacobian)
}

/// Smallest singular value; near zero means the jacobian has lost rank.
pub fn smallest_singular_value(jacobian: &DMatrix<f64>) -> ChainResult<f64> {
    if jacobian.is_empty() {
        return Err(ChainError::EmptyParameterVector);
    }
    let svd = SVD::try_new(jacobian.clone(), false, false, f64::EPSILON, 0)
        .ok_or(ChainError::SvdFailed)?;
    Ok(svd
        .singular_values
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min))
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_jacobian_of_linear_map() {
        let a = DMatrix::from_row_slice(3, 2, &[1., 2., -3., 0.5, 0., 4.]);
        let mut residual = |x: &DVector<f64>| -> ChainResult<DVector<f64>> { Ok(&a * x) };
        let x = DVector::from_vec(vec![0.3, -1.2]);
        let jacobian = numerical_jacobian(&mut residual, &x, 1e-4).unwrap();
        assert_relative_eq!(jacobian, a, epsilon = 1e-9);
    }

    #[test]
    fn test_jacobian_of_sine() {
        let mut residual =
            |x: &DVector<f64>| -> ChainResult<DVector<f64>> { Ok(x.map(f64::sin)) };
        let x = DVector::from_vec(vec![0.4]);
        let jacobian = numerical_jacobian(&mut residual, &x, 1e-4).unwrap();
        assert_relative_eq!(jacobian[(0, 0)], 0.4f64.cos(), epsilon = 1e-8);
    }

    #[test]
    fn test_smallest_singular_value() {
        let diagonal = DMatrix::from_row_slice(3, 2, &[3., 0., 0., 0.25, 0., 0.]);
        assert_relative_eq!(smallest_singular_value(&diagonal).unwrap(), 0.25, epsilon = 1e-12);

        let rank_one = DMatrix::from_row_slice(2, 2, &[1., 2., 2., 4.]);
        assert_relative_eq!(smallest_singular_value(&rank_one).unwrap(), 0., epsilon = 1e-12);

        assert!(matches!(
            smallest_singular_value(&DMatrix::zeros(12, 0)),
            Err(ChainError::EmptyParameterVector)
        ));
    }
}
