use serde::{Deserialize, Serialize};

/// Area covered by one unit-diameter disk.
pub const PARTICLE_AREA: f64 = std::f64::consts::PI * 0.25;

/// A self-propelled disk of unit diameter.
///
/// `x` and `y` live in `[0, width) x [0, height)`; `theta` is an unbounded
/// heading in radians (only ever consumed through `sin`/`cos`).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// Dense particle storage. The index is the particle's identity within a step.
pub type Particles = Vec<Particle>;

impl Particle {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Particle { x, y, theta }
    }

    /// Unit propulsion direction. The x component follows `sin(theta)` and the
    /// y component `cos(theta)`, so `theta = 0` points along +y.
    #[inline(always)]
    pub fn heading(&self) -> (f64, f64) {
        self.theta.sin_cos()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.theta.is_finite()
    }
}

/// Wraps a coordinate that has moved by less than one period back into `[0, period)`.
#[inline(always)]
pub fn wrap_coordinate(value: f64, period: f64) -> f64 {
    let mut v = value;
    if v < 0.0 {
        v += period;
    } else if v >= period {
        v -= period;
    }
    // A tiny negative value plus the period can round onto the upper edge.
    if v >= period {
        v = 0.0;
    }
    v
}
