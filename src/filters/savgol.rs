use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::linear_regression::{LinearRegression, LinearRegressionParameters, LinearRegressionSolverName};

use crate::error::{TecError, TecResult};

/// Derive the Savitzky-Golay convolution coefficients of a window.
///
/// Each coefficient is the value at the window midpoint of the least-squares polynomial fitted
/// to a unit impulse at that window position. The midpoint is `(window_length - 1) / 2`, which
/// falls between two samples for even windows.
///
/// # Arguments
/// - `window_length`: The amount of samples in the window
/// - `polyorder`: The order of the local polynomial. Must be lower than `window_length`
///
/// # Returns
/// The coefficients in window order (oldest sample first).
pub fn savgol_coeffs(window_length: usize, polyorder: usize) -> TecResult<Vec<f64>> {
    if window_length == 0 {
        return Err(TecError::InvalidParameter("window_length must be positive".into()));
    }
    if polyorder >= window_length {
        return Err(TecError::InvalidParameter(format!(
            "polyorder ({polyorder}) must be less than window_length ({window_length})"
        )));
    }

    // A constant fit is the plain window mean.
    if polyorder == 0 {
        return Ok(vec![1. / window_length as f64; window_length]);
    }

    let midpoint = (window_length - 1) as f64 / 2.;

    let rows = (0..window_length)
        .map(|k| {
            let x = k as f64 - midpoint;
            (1..=polyorder).map(|p| x.powi(p as i32)).collect::<Vec<f64>>()
        })
        .collect::<Vec<Vec<f64>>>();
    let xs = DenseMatrix::from_2d_vec(&rows);
    let centre = DenseMatrix::from_2d_vec(&vec![vec![0_f64; polyorder]]);

    let parameters = LinearRegressionParameters::default().with_solver(LinearRegressionSolverName::QR);

    let mut coeffs = Vec::with_capacity(window_length);
    for j in 0..window_length {
        let mut impulse = vec![0_f64; window_length];
        impulse[j] = 1.;

        let lr: LinearRegression<f64, f64, DenseMatrix<f64>, Vec<f64>> =
            LinearRegression::fit(&xs, &impulse, parameters.clone())
                .map_err(|e| TecError::Regression(format!("{e}")))?;
        let fitted = lr.predict(&centre).map_err(|e| TecError::Regression(format!("{e}")))?;

        coeffs.push(fitted[0]);
    }

    Ok(coeffs)
}

/// Run a Savitzky-Golay filter over a series with "nearest" edge extension.
///
/// Output `i` is derived from the window starting at `i - (window_length - 1) / 2`. Samples
/// outside of the series are replaced by the closest edge sample.
///
/// # Arguments
/// - `data`: The series to smooth
/// - `window_length`: The amount of samples in the window
/// - `polyorder`: The order of the local polynomial
///
/// # Returns
/// The smoothed series, or an error if the window is invalid or longer than the series.
pub fn savgol_filter(data: &[f64], window_length: usize, polyorder: usize) -> TecResult<Vec<f64>> {
    let coeffs = savgol_coeffs(window_length, polyorder)?;

    if data.len() < window_length {
        return Err(TecError::WindowTooLong {
            group: "series".into(),
            len: data.len(),
            window: window_length,
        });
    }

    let last = data.len() as isize - 1;
    let half = ((window_length - 1) / 2) as isize;

    Ok((0..data.len() as isize)
        .map(|i| {
            coeffs
                .iter()
                .enumerate()
                .map(|(k, c)| c * data[(i + k as isize - half).clamp(0, last) as usize])
                .sum()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    #[test]
    fn quadratic_five_point_coefficients() {
        let coeffs = super::savgol_coeffs(5, 2).unwrap();
        let expected = [-3., 12., 17., 12., -3.].map(|v| v / 35.);

        for (c, e) in coeffs.iter().zip(expected.iter()) {
            assert_relative_eq!(*c, *e, epsilon = 1e-9);
        }
    }

    #[test]
    fn linear_fit_is_window_mean() {
        for window in [3, 4, 60] {
            let coeffs = super::savgol_coeffs(window, 1).unwrap();
            assert_eq!(coeffs.len(), window);
            for c in coeffs {
                assert_relative_eq!(c, 1. / window as f64, epsilon = 1e-9);
            }
        }
        assert_eq!(super::savgol_coeffs(4, 0).unwrap(), vec![0.25; 4]);
    }

    #[test]
    fn nearest_edges() {
        let smoothed = super::savgol_filter(&[1., 2., 3., 4., 5.], 3, 1).unwrap();
        let expected = [4. / 3., 2., 3., 4., 14. / 3.];

        for (s, e) in smoothed.iter().zip(expected.iter()) {
            assert_relative_eq!(*s, *e, epsilon = 1e-9);
        }
    }

    #[test]
    fn preserves_polynomials_in_the_interior() {
        let data = (0..40).map(|i| 0.5 * (i as f64).powi(2) - 3. * i as f64 + 7.).collect::<Vec<f64>>();
        let smoothed = super::savgol_filter(&data, 7, 2).unwrap();

        for i in 3..37 {
            assert_relative_eq!(smoothed[i], data[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn invalid_parameters() {
        assert!(super::savgol_coeffs(0, 0).is_err());
        assert!(super::savgol_coeffs(3, 3).is_err());

        match super::savgol_filter(&[1., 2., 3.], 5, 1) {
            Err(crate::error::TecError::WindowTooLong { len, window, .. }) => {
                assert_eq!(len, 3);
                assert_eq!(window, 5);
            }
            other => panic!("Expected WindowTooLong, got {:?}", other),
        }
    }
}
