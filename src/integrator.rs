use crate::forces::Delta;
use active_matter_common::{wrap_coordinate, Particle, Particles, SimParams};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IntegrationError {
    /// A coordinate became NaN or infinite; the physical state is corrupted.
    #[error("particle {index} has a non-finite state after integration")]
    NonFinite { index: usize },
    #[error("{deltas} deltas supplied for {particles} particles")]
    LengthMismatch { particles: usize, deltas: usize },
}

/// One explicit Euler step: `new = old + delta * dt` for x, y and heading.
///
/// Positions are wrapped back into the domain by exactly one period (a single
/// step is assumed to move less than a period). Headings are left unwrapped.
pub fn step(
    particles: &[Particle],
    deltas: &[Delta],
    params: &SimParams,
) -> Result<Particles, IntegrationError> {
    if particles.len() != deltas.len() {
        return Err(IntegrationError::LengthMismatch {
            particles: particles.len(),
            deltas: deltas.len(),
        });
    }
    let dt = params.dt;

    let next: Particles = particles
        .par_iter()
        .zip(deltas.par_iter())
        .map(|(p, d)| Particle {
            x: wrap_coordinate(p.x + d.dx * dt, params.width),
            y: wrap_coordinate(p.y + d.dy * dt, params.height),
            theta: p.theta + d.dtheta * dt,
        })
        .collect();

    if let Some(index) = next.iter().position(|p| !p.is_finite()) {
        return Err(IntegrationError::NonFinite { index });
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use active_matter_common::Dynamics;
    use approx::assert_abs_diff_eq;

    fn params() -> SimParams {
        let dynamics = Dynamics { speed: 0.0, k: 0.0, position_noise: 0.0, angular_noise: 0.0, dt: 0.5 };
        SimParams::with_dimensions(10.0, 8.0, 0.1, &dynamics, 0).unwrap()
    }

    #[test]
    fn euler_step_scales_by_dt() {
        let particles = vec![Particle::new(1.0, 2.0, 0.3)];
        let deltas = vec![Delta { dx: 1.0, dy: -2.0, dtheta: 0.4 }];
        let next = step(&particles, &deltas, &params()).unwrap();
        assert_abs_diff_eq!(next[0].x, 1.5);
        assert_abs_diff_eq!(next[0].y, 1.0);
        assert_abs_diff_eq!(next[0].theta, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn positions_wrap_but_heading_does_not() {
        let particles = vec![Particle::new(9.9, 0.1, 6.2), Particle::new(0.1, 7.9, -6.2)];
        let deltas = vec![
            Delta { dx: 0.4, dy: -0.4, dtheta: 1.0 },
            Delta { dx: -0.4, dy: 0.4, dtheta: -1.0 },
        ];
        let next = step(&particles, &deltas, &params()).unwrap();
        assert_abs_diff_eq!(next[0].x, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(next[0].y, 7.9, epsilon = 1e-12);
        assert_abs_diff_eq!(next[1].x, 9.9, epsilon = 1e-12);
        assert_abs_diff_eq!(next[1].y, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(next[0].theta, 6.7, epsilon = 1e-12);
        assert_abs_diff_eq!(next[1].theta, -6.7, epsilon = 1e-12);
    }

    #[test]
    fn non_finite_state_is_reported() {
        let particles = vec![Particle::new(1.0, 1.0, 0.0), Particle::new(2.0, 2.0, 0.0)];
        let deltas = vec![Delta::default(), Delta { dx: f64::NAN, dy: 0.0, dtheta: 0.0 }];
        assert_eq!(
            step(&particles, &deltas, &params()),
            Err(IntegrationError::NonFinite { index: 1 })
        );
    }
}
