//! Quadric error matrices
//!
//! A quadric is the symmetric 4x4 matrix `Q = p p^T` summed over planes
//! `p = (a, b, c, d)`; `v^T Q v` is the summed squared distance from `v` to those planes.
//! Only the upper triangle is stored.

use std::ops::{Add, AddAssign, Mul};

use tessera_core::math::{DMat3, DVec3};

/// Symmetric 4x4 quadric, upper triangle in row-major order
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quadric {
    m: [f64; 10],
}

impl Quadric {
    pub const ZERO: Self = Self { m: [0.0; 10] };

    /// Quadric of the plane `normal . x + d = 0`; `normal` must be unit length
    pub fn from_plane(normal: DVec3, d: f64) -> Self {
        let (a, b, c) = (normal.x, normal.y, normal.z);
        Self {
            m: [
                a * a, a * b, a * c, a * d,
                b * b, b * c, b * d,
                c * c, c * d,
                d * d,
            ],
        }
    }

    /// Plane through `point` with the given unit normal
    pub fn from_point_normal(point: DVec3, normal: DVec3) -> Self {
        Self::from_plane(normal, -normal.dot(point))
    }

    /// Squared distance sum at `p`, clamped at zero against rounding
    pub fn error(&self, p: DVec3) -> f64 {
        let m = &self.m;
        let (x, y, z) = (p.x, p.y, p.z);
        let e = m[0] * x * x + 2.0 * m[1] * x * y + 2.0 * m[2] * x * z + 2.0 * m[3] * x
            + m[4] * y * y + 2.0 * m[5] * y * z + 2.0 * m[6] * y
            + m[7] * z * z + 2.0 * m[8] * z
            + m[9];
        e.max(0.0)
    }

    /// Point minimising the error, `None` when the system is singular
    pub fn optimal_point(&self) -> Option<DVec3> {
        let m = &self.m;
        let a = DMat3::from_cols(
            DVec3::new(m[0], m[1], m[2]),
            DVec3::new(m[1], m[4], m[5]),
            DVec3::new(m[2], m[5], m[7]),
        );
        let det = a.determinant();
        let trace = m[0] + m[4] + m[7];
        // Scale-aware singularity test
        if det.abs() <= 1e-9 * trace.max(1e-12).powi(3) {
            return None;
        }
        let b = DVec3::new(m[3], m[6], m[8]);
        let p = a.inverse() * -b;
        p.is_finite().then_some(p)
    }
}

impl Add for Quadric {
    type Output = Quadric;

    fn add(self, rhs: Quadric) -> Quadric {
        Quadric {
            m: std::array::from_fn(|i| self.m[i] + rhs.m[i]),
        }
    }
}

impl AddAssign for Quadric {
    fn add_assign(&mut self, rhs: Quadric) {
        for (lhs, rhs) in self.m.iter_mut().zip(rhs.m) {
            *lhs += rhs;
        }
    }
}

impl Mul<f64> for Quadric {
    type Output = Quadric;

    fn mul(self, rhs: f64) -> Quadric {
        Quadric {
            m: self.m.map(|v| v * rhs),
        }
    }
}
