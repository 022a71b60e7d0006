//! Closed-form empirical parameterizations.
//!
//! - Sky View Factor, Helbig & Löwe (2014):
//!   `F_sky = 1 − (1 − (1 + a·μ^b)^(−c)) · exp(−d·(L/ξ)^(−2))`
//! - Topographic wind downscaling factor, Helbig et al. (2017):
//!   `X = (1 − a·∇²z / (1 + a·|∇²z|^b)) · c / (1 + d + μ^e)`
//!
//! The downscaling denominator reproduces `1 + d + μ^e` as used in the
//! reference processing chain; the paper's typesetting suggests `1 + d·μ^e`.

use ndarray::{Array2, ArrayView2};

use crate::config::{DownscalingCoefficients, SkyViewCoefficients};
use crate::error::{TopoError, TopoResult};

/// Sky View Factor for mean squared slope `mu`, typical width `xi` and
/// coarse grid resolution `coarse_resolution` (L).
pub fn sky_view_factor(
    mu: f64,
    xi: f64,
    coarse_resolution: f64,
    coeffs: &SkyViewCoefficients,
) -> TopoResult<f64> {
    if mu.is_nan() || mu < 0.0 {
        return Err(TopoError::InvalidDomain {
            name: "mu",
            value: mu,
        });
    }
    if !(xi.is_finite() && xi > 0.0) {
        return Err(TopoError::InvalidDomain {
            name: "xi",
            value: xi,
        });
    }
    if !(coarse_resolution.is_finite() && coarse_resolution > 0.0) {
        return Err(TopoError::InvalidDomain {
            name: "coarse_resolution",
            value: coarse_resolution,
        });
    }

    let SkyViewCoefficients { a, b, c, d } = *coeffs;
    let roughness = 1.0 - (1.0 + a * mu.powf(b)).powf(-c);
    let scale = (-d * (coarse_resolution / xi).powi(-2)).exp();
    Ok(1.0 - roughness * scale)
}

/// Downscaling factor for a single Laplacian value.
pub fn downscaling_factor(
    laplacian: f64,
    mu: f64,
    coeffs: &DownscalingCoefficients,
) -> TopoResult<f64> {
    if mu.is_nan() || mu < 0.0 {
        return Err(TopoError::InvalidDomain {
            name: "mu",
            value: mu,
        });
    }
    if !laplacian.is_finite() {
        return Err(TopoError::InvalidDomain {
            name: "laplacian",
            value: laplacian,
        });
    }

    let DownscalingCoefficients { a, b, c, d, e } = *coeffs;
    let curvature = 1.0 - a * laplacian / (1.0 + a * laplacian.abs().powf(b));
    Ok(curvature * c / (1.0 + d + mu.powf(e)))
}

/// Element-wise downscaling factor over a Laplacian window with a single μ.
///
/// Elements outside `valid` are set to `nodata`; the others are computed
/// whatever their value.
pub fn downscaling_factor_map(
    laplacian: ArrayView2<f64>,
    valid: ArrayView2<bool>,
    mu: f64,
    nodata: f64,
    coeffs: &DownscalingCoefficients,
) -> TopoResult<Array2<f64>> {
    let mut output = Array2::from_elem(laplacian.dim(), nodata);
    for ((out, &lap), &defined) in output.iter_mut().zip(laplacian.iter()).zip(valid.iter()) {
        if defined {
            *out = downscaling_factor(lap, mu, coeffs)?;
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn sky_view_is_one_on_flat_terrain() {
        let svf = sky_view_factor(0.0, 1000.0, 2500.0, &SkyViewCoefficients::default()).unwrap();
        assert_relative_eq!(svf, 1.0, epsilon = 1e-15);
    }

    #[test]
    fn sky_view_reference_value() {
        let coeffs = SkyViewCoefficients::default();
        let (mu, xi, l): (f64, f64, f64) = (0.5, 800.0, 2500.0);
        let expected = 1.0
            - (1.0 - (1.0 + coeffs.a * mu.powf(coeffs.b)).powf(-coeffs.c))
                * (-coeffs.d * (xi / l).powi(2)).exp();
        let svf = sky_view_factor(mu, xi, l, &coeffs).unwrap();
        assert_relative_eq!(svf, expected, epsilon = 1e-12);
        assert!(svf > 0.0 && svf <= 1.0);
    }

    #[test]
    fn sky_view_rejects_negative_mu() {
        let result = sky_view_factor(-0.2, 500.0, 2500.0, &SkyViewCoefficients::default());
        assert!(matches!(result, Err(TopoError::InvalidDomain { name: "mu", .. })));
    }

    #[test]
    fn downscaling_on_flat_terrain() {
        let coeffs = DownscalingCoefficients::default();
        let x = downscaling_factor(0.0, 0.0, &coeffs).unwrap();
        assert_relative_eq!(x, coeffs.c / (1.0 + coeffs.d), epsilon = 1e-15);
    }

    #[test]
    fn ridges_speed_up_valleys_slow_down() {
        let coeffs = DownscalingCoefficients::default();
        let ridge = downscaling_factor(-0.01, 0.3, &coeffs).unwrap();
        let flat = downscaling_factor(0.0, 0.3, &coeffs).unwrap();
        let valley = downscaling_factor(0.01, 0.3, &coeffs).unwrap();
        assert!(ridge > flat);
        assert!(valley < flat);
    }

    #[test]
    fn map_follows_the_validity_mask() {
        let coeffs = DownscalingCoefficients::default();
        let lap = array![[-9999.0, 0.0], [0.001, -9999.0]];
        let valid = array![[false, true], [true, false]];
        let out = downscaling_factor_map(lap.view(), valid.view(), 0.2, -9999.0, &coeffs).unwrap();
        assert_eq!(out[[0, 0]], -9999.0);
        assert_eq!(out[[1, 1]], -9999.0);
        assert_relative_eq!(out[[0, 1]], downscaling_factor(0.0, 0.2, &coeffs).unwrap());
        assert_relative_eq!(out[[1, 0]], downscaling_factor(0.001, 0.2, &coeffs).unwrap());
    }

    #[test]
    fn zero_laplacian_is_computed_under_zero_sentinel() {
        let coeffs = DownscalingCoefficients::default();
        let lap = array![[0.0, 0.0], [0.0, 0.0]];
        let valid = array![[true, true], [true, false]];
        let out = downscaling_factor_map(lap.view(), valid.view(), 0.2, 0.0, &coeffs).unwrap();
        let flat = downscaling_factor(0.0, 0.2, &coeffs).unwrap();
        assert_relative_eq!(out[[0, 0]], flat);
        assert_relative_eq!(out[[1, 0]], flat);
        assert_eq!(out[[1, 1]], 0.0);
    }
}
