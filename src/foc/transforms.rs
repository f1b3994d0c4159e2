// Coordinate transformations for FOC (Field Oriented Control)
// Clarke + Park (dq) forward and inverse transforms

use libm::{cosf, floorf, sinf};

// Enable idsp-based fast trigonometric functions
const USE_IDSP_COSSIN: bool = true;

const SQRT3: f32 = 1.732_050_8; // sqrt(3)
const FRAC_1_SQRT3: f32 = 0.577_350_26; // 1/sqrt(3)

/// Sine and cosine of an electrical angle, computed once per control cycle
/// and passed by reference into every consumer.
#[derive(Debug, Clone, Copy)]
pub struct SinCos {
    pub sin: f32,
    pub cos: f32,
}

impl SinCos {
    /// Compute sin/cos of `theta` (radians).
    ///
    /// Uses idsp::cossin() for fast trigonometric calculation (~40 cycles on
    /// Cortex-M) compared to libm::cosf/sinf (~100-200 cycles). Can be
    /// switched via USE_IDSP_COSSIN.
    pub fn from_theta(theta: f32) -> Self {
        if USE_IDSP_COSSIN {
            Self::from_theta_idsp(theta)
        } else {
            Self::from_theta_libm(theta)
        }
    }

    /// idsp::cossin() path (fast on Cortex-M).
    #[inline]
    fn from_theta_idsp(theta: f32) -> Self {
        use core::f32::consts::{PI, TAU};

        // idsp uses i32::MIN..=i32::MAX to represent -pi..pi, so normalize
        // theta from [0, 2pi) to [-pi, pi) first.
        let normalized_theta = if theta > PI { theta - TAU } else { theta };

        const SCALE: f32 = 2_147_483_648.0 / PI; // 2^31 / pi
        let phase = (normalized_theta * SCALE) as i32;

        // cossin() returns (cos, sin) in the range [-2^31, 2^31-1]
        let (cos_i32, sin_i32) = idsp::cossin(phase);

        const I32_TO_F32: f32 = 1.0 / 2_147_483_648.0; // 1 / 2^31
        Self {
            sin: sin_i32 as f32 * I32_TO_F32,
            cos: cos_i32 as f32 * I32_TO_F32,
        }
    }

    /// libm path (slower, but bit-accurate).
    #[inline]
    fn from_theta_libm(theta: f32) -> Self {
        Self {
            sin: sinf(theta),
            cos: cosf(theta),
        }
    }
}

/// A value in the rotating (d, q) reference frame aligned with the rotor
/// electrical angle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Dq {
    pub d: f32,
    pub q: f32,
}

/// Clarke + Park transform: instantaneous phase values to the rotating
/// (d, q) frame.
///
/// alpha = a, beta = (b - c)/sqrt(3), then
/// d = alpha*cos + beta*sin, q = -alpha*sin + beta*cos.
pub fn dq_transform(sin_cos: &SinCos, a: f32, b: f32, c: f32) -> Dq {
    let alpha = a;
    let beta = (b - c) * FRAC_1_SQRT3;

    Dq {
        d: alpha * sin_cos.cos + beta * sin_cos.sin,
        q: -alpha * sin_cos.sin + beta * sin_cos.cos,
    }
}

/// Inverse Park + inverse Clarke: a (d, q) value back to three phase
/// values `(a, b, c)`.
pub fn inverse_dq_transform(sin_cos: &SinCos, d: f32, q: f32) -> (f32, f32, f32) {
    // Inverse Park (dq -> alpha/beta)
    let alpha = d * sin_cos.cos - q * sin_cos.sin;
    let beta = d * sin_cos.sin + q * sin_cos.cos;

    // Inverse Clarke (alpha/beta -> abc)
    let a = alpha;
    let b = (-alpha + SQRT3 * beta) * 0.5;
    let c = (-alpha - SQRT3 * beta) * 0.5;

    (a, b, c)
}

/// Fractional part of `x`, always in `[0, 1)`.
#[inline]
pub fn frac(x: f32) -> f32 {
    x - floorf(x)
}

/// Clamp `x` to `[min, max]`.
#[inline]
pub fn limit(x: f32, min: f32, max: f32) -> f32 {
    if x < min {
        return min;
    }
    if x > max {
        return max;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::TAU;

    const EPSILON: f32 = 0.001;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn test_sin_cos_identity() {
        // sin^2 + cos^2 == 1 across the full electrical angle range
        let mut theta = 0.0f32;
        while theta < TAU {
            let sc = SinCos::from_theta(theta);
            let norm = sc.sin * sc.sin + sc.cos * sc.cos;
            assert!((norm - 1.0).abs() < 1e-3, "norm {} at theta {}", norm, theta);
            theta += 0.05;
        }
    }

    #[test]
    fn test_sin_cos_known_angles() {
        let sc = SinCos::from_theta(0.0);
        assert!(approx_eq(sc.sin, 0.0));
        assert!(approx_eq(sc.cos, 1.0));

        let sc = SinCos::from_theta(core::f32::consts::FRAC_PI_2);
        assert!(approx_eq(sc.sin, 1.0));
        assert!(approx_eq(sc.cos, 0.0));
    }

    #[test]
    fn test_dq_zero_angle() {
        // At theta = 0 the d axis lines up with phase a.
        let sc = SinCos::from_theta(0.0);
        let dq = dq_transform(&sc, 1.0, -0.5, -0.5);
        assert!(approx_eq(dq.d, 1.0));
        // b == c, so beta and therefore q vanish
        assert!(approx_eq(dq.q, 0.0));
    }

    #[test]
    fn test_dq_round_trip() {
        // For balanced inputs (a + b + c == 0) the inverse transform
        // reconstructs the original phases.
        let cases = [
            (0.3f32, (1.0f32, -0.25f32)),
            (1.7, (-2.0, 0.5)),
            (4.0, (0.0, 1.5)),
            (6.1, (0.7, 0.7)),
        ];
        for (theta, (a, b)) in cases {
            let c = -(a + b);
            let sc = SinCos::from_theta(theta);
            let dq = dq_transform(&sc, a, b, c);
            let (ra, rb, rc) = inverse_dq_transform(&sc, dq.d, dq.q);
            assert!(approx_eq(ra, a), "a: {} vs {}", ra, a);
            assert!(approx_eq(rb, b), "b: {} vs {}", rb, b);
            assert!(approx_eq(rc, c), "c: {} vs {}", rc, c);
        }
    }

    #[test]
    fn test_inverse_dq_balanced() {
        // Inverse transform output always sums to zero.
        let sc = SinCos::from_theta(2.2);
        let (a, b, c) = inverse_dq_transform(&sc, 3.0, -1.5);
        assert!(approx_eq(a + b + c, 0.0));
    }

    #[test]
    fn test_frac() {
        assert!(approx_eq(frac(1.25), 0.25));
        assert!(approx_eq(frac(-0.25), 0.75));
        assert!(approx_eq(frac(3.0), 0.0));
        assert!(frac(-0.001) < 1.0);
        assert!(frac(-0.001) >= 0.0);
    }

    #[test]
    fn test_limit() {
        assert_eq!(limit(5.0, 0.0, 1.0), 1.0);
        assert_eq!(limit(-5.0, 0.0, 1.0), 0.0);
        assert_eq!(limit(0.5, 0.0, 1.0), 0.5);
    }
}
