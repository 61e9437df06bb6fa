//! Small 2D math helpers used by the simulation

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A 2D vector in world units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn length_sq(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Unit vector in the same direction, or zero if the vector is degenerate
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len < 1e-6 {
            Self::ZERO
        } else {
            Self::new(self.x / len, self.y / len)
        }
    }

    pub fn scale(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    pub fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }

    pub fn distance_to(self, other: Self) -> f32 {
        self.sub(other).length()
    }

    /// Rotate counterclockwise by `angle` radians
    pub fn rotated(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Axis-aligned rectangle, used for stair and building zoom regions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn from_center(center: Vec2, half_width: f32, half_height: f32) -> Self {
        Self {
            min: Vec2::new(center.x - half_width, center.y - half_height),
            max: Vec2::new(center.x + half_width, center.y + half_height),
        }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }
}

/// Linear interpolation with t clamped to [0, 1]
pub fn lerp(t: f32, start: f32, end: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    start + (end - start) * t
}

/// Component-wise linear interpolation between two points
pub fn vec_lerp(t: f32, start: Vec2, end: Vec2) -> Vec2 {
    Vec2::new(lerp(t, start.x, end.x), lerp(t, start.y, end.y))
}

/// Uniform random point inside the disc of the given radius around a center
pub fn random_point_inside_circle<R: Rng>(rng: &mut R, center: Vec2, radius: f32) -> Vec2 {
    let angle = rng.gen_range(0.0..std::f32::consts::TAU);
    // sqrt keeps the distribution uniform over area rather than radius
    let distance = radius * rng.gen_range(0.0f32..1.0).sqrt();
    Vec2::new(
        center.x + angle.cos() * distance,
        center.y + angle.sin() * distance,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn lerp_clamps_t() {
        assert_eq!(lerp(-0.5, 10.0, 20.0), 10.0);
        assert_eq!(lerp(0.5, 10.0, 20.0), 15.0);
        assert_eq!(lerp(1.5, 10.0, 20.0), 20.0);
    }

    #[test]
    fn random_point_stays_inside_disc() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let center = Vec2::new(100.0, 100.0);
        for _ in 0..1000 {
            let p = random_point_inside_circle(&mut rng, center, 25.0);
            assert!(p.distance_to(center) <= 25.0 + 1e-4);
        }
    }

    #[test]
    fn normalized_handles_zero_vector() {
        assert_eq!(Vec2::ZERO.normalized(), Vec2::ZERO);
        let v = Vec2::new(3.0, 4.0).normalized();
        assert!((v.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rect_contains_boundary() {
        let r = Rect::from_center(Vec2::new(0.0, 0.0), 2.0, 1.0);
        assert!(r.contains(Vec2::new(2.0, 1.0)));
        assert!(!r.contains(Vec2::new(2.1, 0.0)));
    }
}
