use serde::{Deserialize, Serialize};

/// Continuous 2D galaxy coordinate, in light years.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Point at `radius` from the origin in direction `theta` (radians).
    pub fn polar(radius: f64, theta: f64) -> Self {
        Self::new(radius * theta.cos(), radius * theta.sin())
    }

    pub fn offset(self, radius: f64, theta: f64) -> Self {
        let d = Self::polar(radius, theta);
        Self::new(self.x + d.x, self.y + d.y)
    }

    pub fn distance(self, other: Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Move `step` units along the straight line toward `target`.
    ///
    /// Callers are expected to snap instead when `step` reaches the target.
    pub fn step_toward(self, target: Position, step: f64) -> Position {
        let distance = self.distance(target);
        if distance <= f64::EPSILON {
            return target;
        }
        Position::new(
            self.x + (target.x - self.x) / distance * step,
            self.y + (target.y - self.y) / distance * step,
        )
    }
}

/// Body upgrade aspects a player can buy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeAspect {
    Economy,
    Industry,
    Science,
    WarpGate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_toward_moves_exact_distance() {
        let from = Position::new(0.0, 0.0);
        let to = Position::new(3.0, 4.0);
        let moved = from.step_toward(to, 1.0);
        assert!((moved.distance(from) - 1.0).abs() < 1e-12);
        assert!((moved.x - 0.6).abs() < 1e-12);
        assert!((moved.y - 0.8).abs() < 1e-12);
    }

    #[test]
    fn polar_offset_round_trip_distance() {
        let centre = Position::new(10.0, -2.0);
        let p = centre.offset(5.0, 1.3);
        assert!((p.distance(centre) - 5.0).abs() < 1e-9);
    }
}
