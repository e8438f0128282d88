//! Match simulation: two paddles, one ball, score and status

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::physics::{Ball, Paddle};
use super::vector::Vector3;
use super::{PaddleDirection, Side};

/// Match lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Waiting for both players
    #[default]
    Waiting,
    /// Rally in progress
    Playing,
    /// Halted, scores and positions kept
    Paused,
    /// A player reached the winning score
    Ended,
}

/// Ball position and velocity
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BallSnapshot {
    pub position: Vector3,
    pub velocity: Vector3,
}

/// Both paddle positions
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PaddleSnapshot {
    pub left: Vector3,
    pub right: Vector3,
}

/// Copy of the simulation's externally visible values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub player1_score: u32,
    pub player2_score: u32,
    pub status: MatchStatus,
    pub ball: BallSnapshot,
    pub paddles: PaddleSnapshot,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Not playing, nothing moved
    Idle,
    /// Ball moved; `hit` names the paddle that returned it this tick
    Rally { hit: Option<Side> },
    /// Ball crossed a goal line and was served again
    Point { conceded: Side },
    /// Winning point; the match is over
    MatchOver { winner: u8 },
}

/// Player who scores when the ball leaves through `conceded`
pub fn scorer_for(conceded: Side) -> u8 {
    match conceded {
        Side::Left => 2,
        Side::Right => 1,
    }
}

/// Composes the bodies and applies collision, scoring and termination rules
#[derive(Debug, Clone)]
pub struct MatchSimulation {
    left: Paddle,
    right: Paddle,
    ball: Ball,
    player1_score: u32,
    player2_score: u32,
    max_score: u32,
    status: MatchStatus,
    rng: ChaCha8Rng,
}

impl MatchSimulation {
    pub fn new(max_score: u32) -> Self {
        Self::with_seed(max_score, rand::random())
    }

    /// Deterministic serves for a given seed
    pub fn with_seed(max_score: u32, seed: u64) -> Self {
        Self {
            left: Paddle::new(Side::Left),
            right: Paddle::new(Side::Right),
            ball: Ball::new(),
            player1_score: 0,
            player2_score: 0,
            max_score: max_score.max(1),
            status: MatchStatus::Waiting,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn status(&self) -> MatchStatus {
        self.status
    }

    pub fn max_score(&self) -> u32 {
        self.max_score
    }

    pub fn scores(&self) -> (u32, u32) {
        (self.player1_score, self.player2_score)
    }

    pub fn ball(&self) -> &Ball {
        &self.ball
    }

    pub fn paddle(&self, side: Side) -> &Paddle {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    fn paddle_mut(&mut self, side: Side) -> &mut Paddle {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// Advance one tick. Silent no-op unless playing.
    pub fn tick(&mut self, dt: f32) -> TickOutcome {
        if self.status != MatchStatus::Playing {
            return TickOutcome::Idle;
        }

        self.ball.advance(dt);

        // at most one paddle resolves per tick
        let left = self.left.position();
        let right = self.right.position();
        let hit = if self.ball.collides_with_paddle(left, Side::Left) {
            self.ball.resolve_paddle_hit(left);
            Some(Side::Left)
        } else if self.ball.collides_with_paddle(right, Side::Right) {
            self.ball.resolve_paddle_hit(right);
            Some(Side::Right)
        } else {
            None
        };

        match self.ball.out_of_bounds() {
            Some(conceded) => self.award_point(conceded),
            None => TickOutcome::Rally { hit },
        }
    }

    fn award_point(&mut self, conceded: Side) -> TickOutcome {
        let score = match conceded {
            Side::Left => &mut self.player2_score,
            Side::Right => &mut self.player1_score,
        };
        *score = (*score + 1).min(self.max_score);

        if self.player1_score >= self.max_score || self.player2_score >= self.max_score {
            self.status = MatchStatus::Ended;
            TickOutcome::MatchOver {
                winner: scorer_for(conceded),
            }
        } else {
            self.ball.reset(&mut self.rng);
            TickOutcome::Point { conceded }
        }
    }

    pub fn move_paddle(&mut self, side: Side, direction: PaddleDirection, dt: f32) {
        self.paddle_mut(side).apply_direction(direction, dt);
    }

    pub fn set_paddle_position(&mut self, side: Side, z: f32) {
        self.paddle_mut(side).set_position(z);
    }

    /// Overwrite the ball with authoritative values
    pub fn set_ball_state(&mut self, position: Vector3, velocity: Vector3) {
        self.ball.set_position(position);
        self.ball.set_velocity(velocity);
        self.ball.clamp_to_walls();
    }

    /// Overwrite both scores, clamped to the winning score. A winning score
    /// ends the match from any status. Returns true if this ended the match.
    pub fn set_scores(&mut self, player1: u32, player2: u32) -> bool {
        self.player1_score = player1.min(self.max_score);
        self.player2_score = player2.min(self.max_score);

        if self.winner().is_some() && self.status != MatchStatus::Ended {
            self.status = MatchStatus::Ended;
            return true;
        }
        false
    }

    /// Winner's player number once a score has reached the maximum
    pub fn winner(&self) -> Option<u8> {
        if self.player1_score >= self.max_score {
            Some(1)
        } else if self.player2_score >= self.max_score {
            Some(2)
        } else {
            None
        }
    }

    /// waiting/paused -> playing. Returns true on a transition. A decided
    /// match stays put until reset.
    pub fn start(&mut self) -> bool {
        if self.winner().is_some() {
            return false;
        }
        match self.status {
            MatchStatus::Waiting | MatchStatus::Paused => {
                self.status = MatchStatus::Playing;
                true
            }
            MatchStatus::Playing | MatchStatus::Ended => false,
        }
    }

    /// playing -> paused. Returns true on a transition.
    pub fn pause(&mut self) -> bool {
        if self.status == MatchStatus::Playing {
            self.status = MatchStatus::Paused;
            true
        } else {
            false
        }
    }

    /// playing/paused -> ended. Returns true on a transition.
    pub fn end(&mut self) -> bool {
        match self.status {
            MatchStatus::Playing | MatchStatus::Paused => {
                self.status = MatchStatus::Ended;
                true
            }
            MatchStatus::Waiting | MatchStatus::Ended => false,
        }
    }

    /// Back to waiting with zeroed scores, a fresh serve and centered paddles
    pub fn reset(&mut self) {
        self.player1_score = 0;
        self.player2_score = 0;
        self.status = MatchStatus::Waiting;
        self.ball.reset(&mut self.rng);
        self.left.set_position(0.0);
        self.right.set_position(0.0);
    }

    pub fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot {
            player1_score: self.player1_score,
            player2_score: self.player2_score,
            status: self.status,
            ball: BallSnapshot {
                position: self.ball.position(),
                velocity: self.ball.velocity(),
            },
            paddles: PaddleSnapshot {
                left: self.left.position(),
                right: self.right.position(),
            },
        }
    }
}
