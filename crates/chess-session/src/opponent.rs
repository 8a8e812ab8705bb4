//! Moves for the side the player does not control.

use std::time::Duration;

use chess_core::{Candidate, LegalMove};
use rand::Rng;
use shakmaty::Color;
use tracing::debug;

use crate::scheduler::{Scheduler, TaskToken};
use crate::session::{Phase, PlayerSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Uniformly random legal move after a fixed delay.
    RandomBot,
    /// Next expected move of a puzzle solution.
    PuzzleScript,
}

/// Snapshot of the session the driver decides on.
#[derive(Debug, Clone, Copy)]
pub struct DriverContext {
    pub phase: Phase,
    pub at_tip: bool,
    /// Timeline length.
    pub ply: usize,
    /// Side to move at the tip.
    pub turn: Color,
    pub player: PlayerSide,
    /// Input blocked or script exhausted; the driver must stay quiet.
    pub blocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverDecision {
    Nothing,
    /// A pending task was invalidated.
    Cancelled(TaskToken),
    Scheduled { token: TaskToken, delay: Duration },
}

#[derive(Debug)]
pub struct OpponentDriver {
    kind: Option<DriverKind>,
    active: bool,
    last_handled_ply: Option<usize>,
    scheduler: Scheduler,
    bot_delay: Duration,
    script_delay: Duration,
}

impl OpponentDriver {
    pub fn new(bot_delay: Duration, script_delay: Duration) -> Self {
        Self {
            kind: None,
            active: false,
            last_handled_ply: None,
            scheduler: Scheduler::default(),
            bot_delay,
            script_delay,
        }
    }

    pub fn kind(&self) -> Option<DriverKind> {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active && self.kind.is_some()
    }

    /// Switch variant. Any pending task is cancelled and the ply guard cleared.
    pub fn set_kind(&mut self, kind: Option<DriverKind>) -> Option<TaskToken> {
        self.kind = kind;
        self.active = kind.is_some();
        self.last_handled_ply = None;
        self.scheduler.cancel()
    }

    pub fn set_active(&mut self, active: bool) -> Option<TaskToken> {
        self.active = active;
        if active {
            None
        } else {
            self.scheduler.cancel()
        }
    }

    pub fn pending(&self) -> Option<TaskToken> {
        self.scheduler.pending()
    }

    /// Re-evaluate after any state transition. Schedules at most one move per
    /// ply however often it is called.
    pub fn on_state_change(&mut self, ctx: &DriverContext) -> DriverDecision {
        if !ctx.at_tip {
            self.last_handled_ply = None;
        }

        let eligible = self.is_active()
            && ctx.phase == Phase::Playing
            && ctx.at_tip
            && !ctx.blocked
            && ctx.player.color().is_some_and(|c| c != ctx.turn);

        if let Some(pending) = self.scheduler.pending() {
            if !eligible || pending.ply != ctx.ply {
                self.scheduler.cancel();
                debug!(ply = pending.ply, "opponent move cancelled");
                if !eligible {
                    return DriverDecision::Cancelled(pending);
                }
            } else {
                return DriverDecision::Nothing;
            }
        }

        if !eligible || self.last_handled_ply == Some(ctx.ply) {
            return DriverDecision::Nothing;
        }

        self.last_handled_ply = Some(ctx.ply);
        let token = self.scheduler.schedule(ctx.ply);
        let delay = match self.kind {
            Some(DriverKind::PuzzleScript) => self.script_delay,
            _ => self.bot_delay,
        };
        debug!(ply = ctx.ply, generation = token.generation, delay_ms = delay.as_millis() as u64, "opponent move scheduled");
        DriverDecision::Scheduled { token, delay }
    }

    /// Claim a fired task. False for anything stale.
    pub fn fire(&mut self, token: TaskToken) -> bool {
        self.scheduler.take_if_current(token)
    }

    pub fn cancel(&mut self) -> Option<TaskToken> {
        self.scheduler.cancel()
    }
}

/// Uniform pick among `legal`; `None` when there is nothing to play.
pub fn choose_random<R: Rng + ?Sized>(rng: &mut R, legal: &[LegalMove]) -> Option<Candidate> {
    if legal.is_empty() {
        return None;
    }
    let m = &legal[rng.gen_range(0..legal.len())];
    // Always promote to a queen.
    Some(match m.promotion {
        Some(_) => Candidate::new(m.from, m.to).with_promotion(shakmaty::Role::Queen),
        None => m.candidate(),
    })
}
