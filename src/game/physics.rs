//! Ball and paddle physics within the fixed arena bounds

use rand::Rng;

use super::vector::Vector3;
use super::{PaddleDirection, Side};

/// Ball radius
pub const BALL_RADIUS: f32 = 0.15;
/// Ball speed after a serve; rallies never drop below it
pub const BALL_BASE_SPEED: f32 = 6.0;
/// Multiplier applied to the hit offset when a paddle returns the ball
pub const PADDLE_DEFLECTION: f32 = 2.0;

/// Paddle travel speed in units per second
pub const PADDLE_SPEED: f32 = 8.0;
/// Paddle extent along x
pub const PADDLE_WIDTH: f32 = 0.2;
/// Paddle extent along z
pub const PADDLE_DEPTH: f32 = 2.0;
/// Paddle x for each side
pub const PADDLE_OFFSET_X: f32 = 7.0;

/// Rectangular play area for the ball
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArenaBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_z: f32,
    pub max_z: f32,
}

impl Default for ArenaBounds {
    fn default() -> Self {
        Self {
            min_x: -7.5,
            max_x: 7.5,
            min_z: -4.5,
            max_z: 4.5,
        }
    }
}

/// Travel range of a paddle along z
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaddleBounds {
    pub min: f32,
    pub max: f32,
}

impl Default for PaddleBounds {
    fn default() -> Self {
        Self { min: -4.0, max: 4.0 }
    }
}

impl PaddleBounds {
    pub fn clamp(&self, z: f32) -> f32 {
        z.max(self.min).min(self.max)
    }
}

/// The ball
#[derive(Debug, Clone)]
pub struct Ball {
    position: Vector3,
    velocity: Vector3,
    radius: f32,
    base_speed: f32,
    bounds: ArenaBounds,
}

impl Default for Ball {
    fn default() -> Self {
        Self::new()
    }
}

impl Ball {
    /// Ball at the origin heading right at base speed
    pub fn new() -> Self {
        Self {
            position: Vector3::ZERO,
            velocity: Vector3::new(BALL_BASE_SPEED, 0.0, 0.0),
            radius: BALL_RADIUS,
            base_speed: BALL_BASE_SPEED,
            bounds: ArenaBounds::default(),
        }
    }

    pub fn position(&self) -> Vector3 {
        self.position
    }

    pub fn velocity(&self) -> Vector3 {
        self.velocity
    }

    pub fn set_position(&mut self, position: Vector3) {
        self.position = position;
    }

    pub fn set_velocity(&mut self, velocity: Vector3) {
        self.velocity = velocity;
    }

    /// Integrate one step and reflect off the top and bottom walls
    pub fn advance(&mut self, dt: f32) {
        self.position += self.velocity * dt;

        if self.position.z >= self.bounds.max_z || self.position.z <= self.bounds.min_z {
            self.velocity.z = -self.velocity.z;
            self.position.z = self
                .position
                .z
                .max(self.bounds.min_z)
                .min(self.bounds.max_z);
        }
    }

    /// Whether the ball's leading edge has reached the paddle face while
    /// travelling toward it, inside the paddle's depth.
    pub fn collides_with_paddle(&self, paddle: Vector3, side: Side) -> bool {
        let half_width = PADDLE_WIDTH / 2.0;
        let half_depth = PADDLE_DEPTH / 2.0;
        let ball = self.position;

        let reached = match side {
            Side::Left => {
                ball.x - self.radius <= paddle.x + half_width
                    && ball.x >= paddle.x
                    && self.velocity.x < 0.0
            }
            Side::Right => {
                ball.x + self.radius >= paddle.x - half_width
                    && ball.x <= paddle.x
                    && self.velocity.x > 0.0
            }
        };

        reached && ball.z >= paddle.z - half_depth && ball.z <= paddle.z + half_depth
    }

    /// Return the ball off a paddle, angled by where it struck
    pub fn resolve_paddle_hit(&mut self, paddle: Vector3) {
        self.velocity.x = -self.velocity.x;
        self.velocity.z = (self.position.z - paddle.z) * PADDLE_DEFLECTION;

        let speed = self.velocity.length();
        self.velocity = self.velocity.normalize() * speed.max(self.base_speed);
    }

    /// Which goal line the ball has crossed, if any
    pub fn out_of_bounds(&self) -> Option<Side> {
        if self.position.x < self.bounds.min_x {
            Some(Side::Left)
        } else if self.position.x > self.bounds.max_x {
            Some(Side::Right)
        } else {
            None
        }
    }

    /// Serve from the center toward a random side
    pub fn reset<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let direction = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        self.position = Vector3::ZERO;
        self.velocity = Vector3::new(self.base_speed * direction, 0.0, 0.0);
    }

    /// Keep z inside the walls; x is left free since crossing it scores
    pub fn clamp_to_walls(&mut self) {
        self.position.z = self
            .position
            .z
            .max(self.bounds.min_z)
            .min(self.bounds.max_z);
    }
}

/// A paddle on one side of the arena
#[derive(Debug, Clone)]
pub struct Paddle {
    side: Side,
    position: Vector3,
    speed: f32,
    bounds: PaddleBounds,
}

impl Paddle {
    pub fn new(side: Side) -> Self {
        let x = match side {
            Side::Left => -PADDLE_OFFSET_X,
            Side::Right => PADDLE_OFFSET_X,
        };
        Self {
            side,
            position: Vector3::new(x, 0.0, 0.0),
            speed: PADDLE_SPEED,
            bounds: PaddleBounds::default(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn position(&self) -> Vector3 {
        self.position
    }

    pub fn z(&self) -> f32 {
        self.position.z
    }

    pub fn move_up(&mut self, dt: f32) {
        self.position.z = (self.position.z + self.speed * dt).min(self.bounds.max);
    }

    pub fn move_down(&mut self, dt: f32) {
        self.position.z = (self.position.z - self.speed * dt).max(self.bounds.min);
    }

    pub fn apply_direction(&mut self, direction: PaddleDirection, dt: f32) {
        match direction {
            PaddleDirection::Up => self.move_up(dt),
            PaddleDirection::Down => self.move_down(dt),
            PaddleDirection::Idle => {}
        }
    }

    pub fn set_position(&mut self, z: f32) {
        self.position.z = self.bounds.clamp(z);
    }
}
