//! Stage runtime: the spot-the-difference state machine.
//!
//! `StageRuntime::handle` is a pure transition function over timestamped events. Network
//! requests, persistence and navigation are reported as `Effect`s so the async driver stays
//! a thin shell and every scenario can be replayed deterministically in tests.

use std::collections::BTreeSet;
use std::time::Duration;

use engine::clock::Millis;
use engine::countdown::Countdown;
use engine::layout::{Letterbox, PixelPoint, Point, Size};
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, CheckReply, FinishReply, GameDetail, GameStatus, StageResult};
use crate::model::{
    GameId, ImageSide, LIVES_INITIAL, MissMarker, NOTICE_TTL, POLL_INTERVAL, Puzzle, Region,
    STAGE_DURATION, StageEndReason,
};
use crate::overlay::Overlay;
use crate::poller::Poller;

/// Identifies the request a reply belongs to.
///
/// `epoch` changes on every terminal transition, `stage` on every stage change and `seq` is
/// unique per request, so late or duplicated replies can always be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub epoch: u64,
    pub stage: u32,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent {
    /// Pointer position relative to the image element's bounding box.
    Click { side: ImageSide, point: Point },
    Resize { side: ImageSide, bounds: Size },
    ImageLoaded { side: ImageSide, intrinsic: Size },
    RequestExit,
    ConfirmExit,
    DismissExit,
    Retry,
    Back,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Boot {
        game_id: Option<GameId>,
    },
    Intent(Intent),
    Tick,
    GameLoaded {
        ticket: Ticket,
        result: Result<GameDetail, ApiError>,
    },
    CheckReplied {
        ticket: Ticket,
        point: PixelPoint,
        result: Result<CheckReply, ApiError>,
    },
    CompletionReplied {
        ticket: Ticket,
        result: Result<StageResult, ApiError>,
    },
    FinishReplied {
        ticket: Ticket,
        result: Result<FinishReply, ApiError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Entry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchGame {
        ticket: Ticket,
        game_id: GameId,
    },
    SubmitCheck {
        ticket: Ticket,
        game_id: GameId,
        stage: u32,
        point: PixelPoint,
    },
    /// Both the initial stage completion and readiness polls (zero play time).
    CompleteStage {
        ticket: Ticket,
        game_id: GameId,
        stage: u32,
        play_time: Duration,
    },
    FinishGame {
        ticket: Ticket,
        game_id: GameId,
        play_time: Duration,
    },
    ClearGameId,
    Navigate(Destination),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStep {
    Completing,
    /// The completion request failed; waiting for the player to retry or leave.
    Failed,
    Finishing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameOutcome {
    Finished { final_score: Option<i64> },
    Aborted,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Playing,
    FinishedStage {
        reason: StageEndReason,
        step: CompletionStep,
    },
    AwaitingNext,
    GameOver {
        outcome: GameOutcome,
    },
}

impl Phase {
    pub fn is_loading(&self) -> bool {
        matches!(self, Phase::Loading)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Phase::Playing)
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Phase::AwaitingNext)
    }

    pub fn is_game_over(&self) -> bool {
        matches!(self, Phase::GameOver { .. })
    }

    pub fn final_score(&self) -> Option<i64> {
        match self {
            Phase::GameOver {
                outcome: GameOutcome::Finished { final_score },
            } => *final_score,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct StageState {
    index: u32,
    puzzle: Puzzle,
    lives: u32,
    time_remaining: Duration,
    started_at: Millis,
    play_time: Duration,
    ended: Option<StageEndReason>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ImageFrame {
    intrinsic: Option<Size>,
    bounds: Option<Size>,
    layout: Option<Letterbox>,
}

impl ImageFrame {
    fn relayout(&mut self) {
        self.layout = match (self.intrinsic, self.bounds) {
            (Some(intrinsic), Some(bounds)) => Letterbox::fit(intrinsic, bounds),
            _ => None,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Notice {
    text: String,
    expires_at: Millis,
}

/// Everything the view needs, detached from the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSnapshot {
    pub phase: Phase,
    pub stage_index: u32,
    pub total_stages: u32,
    pub lives: u32,
    pub time_remaining: Duration,
    pub found: Vec<Region>,
    pub misses: Vec<MissMarker>,
    pub current_score: i64,
    pub puzzle: Option<Puzzle>,
    pub final_score: Option<i64>,
    /// Per-side layout, indexed by `ImageSide::index`. Image space is the loaded image's
    /// intrinsic size, which may differ from the puzzle's.
    pub layouts: [Option<Letterbox>; 2],
    pub confirm_exit: bool,
    pub notice: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StageRuntime {
    now: Millis,
    epoch: u64,
    seq: u64,
    phase: Phase,
    game_id: Option<GameId>,
    stage: Option<StageState>,
    total_stages: u32,
    current_score: i64,
    total_play: Duration,
    overlay: Overlay,
    countdown: Countdown<u32>,
    poller: Poller,
    pending_load: Option<u64>,
    pending_checks: BTreeSet<u64>,
    completion: Option<u64>,
    pending_finish: Option<u64>,
    frames: [ImageFrame; 2],
    confirm_exit: bool,
    notice: Option<Notice>,
}

impl Default for StageRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRuntime {
    pub fn new() -> Self {
        Self {
            now: Millis::ZERO,
            epoch: 0,
            seq: 0,
            phase: Phase::Loading,
            game_id: None,
            stage: None,
            total_stages: 1,
            current_score: 0,
            total_play: Duration::ZERO,
            overlay: Overlay::new(),
            countdown: Countdown::new(),
            poller: Poller::new(POLL_INTERVAL),
            pending_load: None,
            pending_checks: BTreeSet::new(),
            completion: None,
            pending_finish: None,
            frames: [ImageFrame::default(); 2],
            confirm_exit: false,
            notice: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn game_id(&self) -> Option<&GameId> {
        self.game_id.as_ref()
    }

    pub fn stage_index(&self) -> Option<u32> {
        self.stage.as_ref().map(|s| s.index)
    }

    pub fn lives(&self) -> u32 {
        self.stage.as_ref().map_or(0, |s| s.lives)
    }

    pub fn current_score(&self) -> i64 {
        self.current_score
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn timer_active(&self) -> bool {
        self.countdown.is_active()
    }

    pub fn poller_active(&self) -> bool {
        self.poller.is_active()
    }

    pub fn checks_in_flight(&self) -> usize {
        self.pending_checks.len()
    }

    pub fn total_play_time(&self) -> Duration {
        self.total_play
    }

    pub fn handle(&mut self, now: Millis, event: Event) -> Vec<Effect> {
        self.now = self.now.max(now);
        self.refresh_time();

        // An expired stage ends before anything else is looked at, whatever event noticed it.
        let mut effects = match event {
            Event::Boot { .. } => Vec::new(),
            _ => self.expire_stage(),
        };

        effects.extend(match event {
            Event::Boot { game_id } => self.boot(game_id),
            Event::Intent(intent) => self.on_intent(intent),
            Event::Tick => self.on_tick(),
            Event::GameLoaded { ticket, result } => self.on_game_loaded(ticket, result),
            Event::CheckReplied {
                ticket,
                point,
                result,
            } => self.on_check_replied(ticket, point, result),
            Event::CompletionReplied { ticket, result } => {
                self.on_completion_replied(ticket, result)
            }
            Event::FinishReplied { ticket, result } => self.on_finish_replied(ticket, result),
        });
        effects
    }

    pub fn snapshot(&self) -> RuntimeSnapshot {
        let stage = self.stage.as_ref();
        RuntimeSnapshot {
            phase: self.phase.clone(),
            stage_index: stage.map_or(0, |s| s.index),
            total_stages: self.total_stages,
            lives: stage.map_or(0, |s| s.lives),
            time_remaining: stage.map_or(Duration::ZERO, |s| s.time_remaining),
            found: self.overlay.found().to_vec(),
            misses: self.overlay.visible_misses(self.now).copied().collect(),
            current_score: self.current_score,
            puzzle: stage.map(|s| s.puzzle.clone()),
            final_score: self.phase.final_score(),
            layouts: [self.frames[0].layout, self.frames[1].layout],
            confirm_exit: self.confirm_exit,
            notice: self
                .notice
                .as_ref()
                .filter(|n| self.now < n.expires_at)
                .map(|n| n.text.clone()),
        }
    }

    fn refresh_time(&mut self) {
        if !self.phase.is_playing() {
            return;
        }
        let remaining = self.countdown.remaining(self.now);
        if let Some(stage) = self.stage.as_mut() {
            stage.time_remaining = remaining;
        }
    }

    fn expire_stage(&mut self) -> Vec<Effect> {
        if !self.phase.is_playing() {
            return Vec::new();
        }
        let current = self.stage.as_ref().map(|s| s.index);
        match self.countdown.tick(self.now) {
            Some(index) if Some(index) == current => self.end_stage(StageEndReason::TimeUp),
            _ => Vec::new(),
        }
    }

    fn next_ticket(&mut self, stage: u32) -> Ticket {
        self.seq += 1;
        Ticket {
            epoch: self.epoch,
            stage,
            seq: self.seq,
        }
    }

    fn set_notice(&mut self, text: impl Into<String>) {
        self.notice = Some(Notice {
            text: text.into(),
            expires_at: self.now.saturating_add(NOTICE_TTL),
        });
    }

    fn boot(&mut self, game_id: Option<GameId>) -> Vec<Effect> {
        *self = Self {
            now: self.now,
            epoch: self.epoch + 1,
            seq: self.seq,
            frames: self.frames,
            ..Self::new()
        };
        for frame in &mut self.frames {
            frame.intrinsic = None;
            frame.relayout();
        }

        let Some(game_id) = game_id else {
            info!("no game in progress; returning to entry");
            self.phase = Phase::GameOver {
                outcome: GameOutcome::Aborted,
            };
            return vec![Effect::Navigate(Destination::Entry)];
        };

        info!(%game_id, "loading game");
        self.game_id = Some(game_id);
        self.issue_load().into_iter().collect()
    }

    fn issue_load(&mut self) -> Option<Effect> {
        let game_id = self.game_id.clone()?;
        let ticket = self.next_ticket(0);
        self.pending_load = Some(ticket.seq);
        Some(Effect::FetchGame { ticket, game_id })
    }

    fn on_game_loaded(
        &mut self,
        ticket: Ticket,
        result: Result<GameDetail, ApiError>,
    ) -> Vec<Effect> {
        if ticket.epoch != self.epoch || self.pending_load != Some(ticket.seq) {
            warn!(?ticket, "dropping stale game load reply");
            return Vec::new();
        }
        self.pending_load = None;

        let detail = match result {
            Ok(detail) => detail,
            Err(err) if err.is_fatal() => {
                error!(%err, "game load failed");
                return self.terminate(GameOutcome::Failed {
                    message: err.to_string(),
                });
            }
            Err(err) => {
                warn!(%err, "game load failed; waiting for retry");
                self.set_notice("게임을 불러오지 못했습니다. 다시 시도해 주세요.");
                return Vec::new();
            }
        };

        self.total_stages = detail.total_stages.max(1);
        self.current_score = detail.current_score;

        if matches!(detail.status, Some(GameStatus::Finished | GameStatus::Completed)) {
            info!(score = detail.current_score, "game already finished");
            return self.terminate(GameOutcome::Finished {
                final_score: Some(detail.current_score),
            });
        }

        let Some(puzzle) = detail.puzzle else {
            error!("game has no puzzle");
            return self.terminate(GameOutcome::Failed {
                message: "퍼즐 정보가 없습니다.".to_string(),
            });
        };

        self.enter_stage(detail.current_stage, puzzle, detail.found)
    }

    fn enter_stage(&mut self, index: u32, puzzle: Puzzle, found: Vec<Region>) -> Vec<Effect> {
        let total = puzzle.total_difference_count;
        info!(
            stage = index,
            total_stages = self.total_stages,
            differences = total,
            "stage started"
        );

        self.poller.cancel();
        self.pending_checks.clear();
        self.completion = None;
        self.confirm_exit = false;
        self.overlay.clear();
        self.overlay
            .replace_found(found.into_iter().take(total as usize).collect());
        for frame in &mut self.frames {
            frame.intrinsic = None;
            frame.relayout();
        }

        self.countdown.start(self.now, STAGE_DURATION, index);
        self.stage = Some(StageState {
            index,
            puzzle,
            lives: LIVES_INITIAL,
            time_remaining: STAGE_DURATION,
            started_at: self.now,
            play_time: Duration::ZERO,
            ended: None,
        });
        self.phase = Phase::Playing;

        if self.overlay.found().len() >= total as usize {
            return self.end_stage(StageEndReason::AllFound);
        }
        Vec::new()
    }

    fn end_stage(&mut self, reason: StageEndReason) -> Vec<Effect> {
        let remaining = self.countdown.remaining(self.now);
        self.countdown.cancel();
        self.confirm_exit = false;

        let Some(stage) = self.stage.as_mut() else {
            return Vec::new();
        };
        stage.time_remaining = remaining;
        // A late tick must not report more than the stage allows.
        stage.play_time = self.now.duration_since(stage.started_at).min(STAGE_DURATION);
        stage.ended = Some(reason);
        self.total_play += stage.play_time;
        info!(
            stage = stage.index,
            ?reason,
            play_time_ms = stage.play_time.as_millis() as u64,
            "stage ended"
        );

        self.phase = Phase::FinishedStage {
            reason,
            step: CompletionStep::Completing,
        };
        self.issue_completion().into_iter().collect()
    }

    fn issue_completion(&mut self) -> Option<Effect> {
        let game_id = self.game_id.clone()?;
        let (index, play_time) = self.stage.as_ref().map(|s| (s.index, s.play_time))?;
        let ticket = self.next_ticket(index);
        self.completion = Some(ticket.seq);
        Some(Effect::CompleteStage {
            ticket,
            game_id,
            stage: index,
            play_time,
        })
    }

    fn on_intent(&mut self, intent: Intent) -> Vec<Effect> {
        match intent {
            Intent::Click { side, point } => self.on_click(side, point),
            Intent::Resize { side, bounds } => {
                let frame = &mut self.frames[side.index()];
                frame.bounds = Some(bounds);
                frame.relayout();
                Vec::new()
            }
            Intent::ImageLoaded { side, intrinsic } => {
                let frame = &mut self.frames[side.index()];
                frame.intrinsic = Some(intrinsic);
                frame.relayout();
                Vec::new()
            }
            Intent::RequestExit | Intent::Back => match self.phase {
                Phase::GameOver { .. } => vec![Effect::Navigate(Destination::Entry)],
                Phase::Playing => {
                    self.confirm_exit = true;
                    Vec::new()
                }
                _ => self.terminate(GameOutcome::Aborted),
            },
            Intent::ConfirmExit if self.confirm_exit && !self.phase.is_game_over() => {
                info!("player left the game");
                self.terminate(GameOutcome::Aborted)
            }
            Intent::ConfirmExit => Vec::new(),
            Intent::DismissExit => {
                self.confirm_exit = false;
                Vec::new()
            }
            Intent::Retry => self.on_retry(),
        }
    }

    fn on_retry(&mut self) -> Vec<Effect> {
        match self.phase {
            Phase::Loading if self.pending_load.is_none() => {
                self.issue_load().into_iter().collect()
            }
            Phase::FinishedStage {
                reason,
                step: CompletionStep::Failed,
            } => {
                self.phase = Phase::FinishedStage {
                    reason,
                    step: CompletionStep::Completing,
                };
                self.issue_completion().into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    fn on_click(&mut self, side: ImageSide, point: Point) -> Vec<Effect> {
        if !self.phase.is_playing() || self.confirm_exit {
            return Vec::new();
        }
        let Some(stage) = self.stage.as_ref() else {
            return Vec::new();
        };
        let Some(layout) = self.frames[side.index()].layout else {
            debug!(?side, "click before image layout is known");
            return Vec::new();
        };
        let Ok(pixel) = layout.map_click(point) else {
            debug!(?side, x = point.x, y = point.y, "click outside displayed image");
            return Vec::new();
        };
        let pixel = to_puzzle_space(pixel, layout.image(), stage.puzzle.size());

        let Some(game_id) = self.game_id.clone() else {
            return Vec::new();
        };
        let index = stage.index;
        let ticket = self.next_ticket(index);
        self.pending_checks.insert(ticket.seq);
        debug!(x = pixel.x, y = pixel.y, stage = index, "submitting check");
        vec![Effect::SubmitCheck {
            ticket,
            game_id,
            stage: index,
            point: pixel,
        }]
    }

    fn on_check_replied(
        &mut self,
        ticket: Ticket,
        point: PixelPoint,
        result: Result<CheckReply, ApiError>,
    ) -> Vec<Effect> {
        let current_stage = self.stage.as_ref().map(|s| s.index);
        if ticket.epoch != self.epoch
            || current_stage != Some(ticket.stage)
            || !self.pending_checks.remove(&ticket.seq)
        {
            warn!(?ticket, "dropping stale check reply");
            return Vec::new();
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(err) if !self.phase.is_playing() => {
                debug!(%err, "check failed after the stage ended");
                return Vec::new();
            }
            Err(err) if err.is_fatal() => {
                error!(%err, "check failed");
                return self.terminate(GameOutcome::Failed {
                    message: err.to_string(),
                });
            }
            Err(err) => {
                warn!(%err, "check failed; click ignored");
                self.set_notice("네트워크 오류가 발생했습니다. 다시 클릭해 주세요.");
                return Vec::new();
            }
        };

        let Some(stage) = self.stage.as_mut() else {
            return Vec::new();
        };
        let total = stage.puzzle.total_difference_count;
        self.overlay
            .replace_found(reply.found.into_iter().take(total as usize).collect());
        self.current_score = reply.current_score;

        if reply.game_status.ends_game() {
            info!(score = reply.current_score, "server ended the game");
            return self.terminate(GameOutcome::Finished {
                final_score: Some(reply.current_score),
            });
        }

        // Only the playing phase may spend lives or add misses; the stage may have ended while
        // this check was in flight.
        if !self.phase.is_playing() || reply.is_already_found {
            return Vec::new();
        }

        if reply.is_correct {
            let by_count = reply.total_difference_count > 0
                && reply.found_difference_count >= reply.total_difference_count;
            if self.overlay.found().len() >= total as usize || by_count {
                return self.end_stage(StageEndReason::AllFound);
            }
            return Vec::new();
        }

        self.overlay.add_miss(point, self.now);
        stage.lives = stage.lives.saturating_sub(1);
        debug!(lives = stage.lives, "wrong click");
        if stage.lives == 0 {
            return self.end_stage(StageEndReason::LivesExhausted);
        }
        Vec::new()
    }

    fn on_tick(&mut self) -> Vec<Effect> {
        self.overlay.prune(self.now);
        if self
            .notice
            .as_ref()
            .is_some_and(|n| self.now >= n.expires_at)
        {
            self.notice = None;
        }

        match self.phase {
            Phase::AwaitingNext if self.poller.due(self.now) => {
                let (Some(game_id), Some(index)) =
                    (self.game_id.clone(), self.stage.as_ref().map(|s| s.index))
                else {
                    return Vec::new();
                };
                let ticket = self.next_ticket(index);
                self.poller.issued(ticket.seq, self.now);
                debug!(stage = index, "polling for next stage");
                vec![Effect::CompleteStage {
                    ticket,
                    game_id,
                    stage: index,
                    play_time: Duration::ZERO,
                }]
            }
            _ => Vec::new(),
        }
    }

    fn on_completion_replied(
        &mut self,
        ticket: Ticket,
        result: Result<StageResult, ApiError>,
    ) -> Vec<Effect> {
        let current_stage = self.stage.as_ref().map(|s| s.index);
        if ticket.epoch != self.epoch || current_stage != Some(ticket.stage) {
            warn!(?ticket, "dropping stale completion reply");
            return Vec::new();
        }

        if self.completion == Some(ticket.seq) {
            self.completion = None;
            return match result {
                Ok(result) => self.apply_stage_result(result),
                Err(err) if err.is_fatal() => {
                    error!(%err, "stage completion failed");
                    self.terminate(GameOutcome::Failed {
                        message: err.to_string(),
                    })
                }
                Err(err) => {
                    warn!(%err, "stage completion failed; waiting for retry");
                    if let Phase::FinishedStage { reason, .. } = self.phase {
                        self.phase = Phase::FinishedStage {
                            reason,
                            step: CompletionStep::Failed,
                        };
                    }
                    self.set_notice("결과를 전송하지 못했습니다. 다시 시도해 주세요.");
                    Vec::new()
                }
            };
        }

        if self.poller.settle(ticket.seq, self.now) {
            return match result {
                Ok(result) => self.apply_stage_result(result),
                Err(err) if err.is_fatal() => {
                    error!(%err, "readiness poll failed");
                    self.terminate(GameOutcome::Failed {
                        message: err.to_string(),
                    })
                }
                Err(err) => {
                    warn!(%err, "readiness poll failed; retrying");
                    Vec::new()
                }
            };
        }

        warn!(?ticket, "dropping unexpected completion reply");
        Vec::new()
    }

    fn apply_stage_result(&mut self, result: StageResult) -> Vec<Effect> {
        self.current_score = result.current_score;
        if let Some(total) = result.total_stages {
            self.total_stages = total.max(1);
        }

        match (result.status, result.next_puzzle) {
            (GameStatus::Finished | GameStatus::Completed, _) => self.begin_finish(),
            (_, Some(puzzle)) => {
                let next = result
                    .next_stage_number
                    .or_else(|| self.stage.as_ref().map(|s| s.index + 1))
                    .unwrap_or(0);
                self.enter_stage(next, puzzle, Vec::new())
            }
            // Anything else means the next puzzle is not ready yet.
            (status, None) => {
                if !self.phase.is_waiting() {
                    info!(?status, "waiting for next stage");
                    self.phase = Phase::AwaitingNext;
                    self.poller.start(self.now);
                }
                Vec::new()
            }
        }
    }

    fn begin_finish(&mut self) -> Vec<Effect> {
        self.poller.cancel();
        let Some(game_id) = self.game_id.clone() else {
            return Vec::new();
        };
        let (index, reason) = self
            .stage
            .as_ref()
            .map(|s| (s.index, s.ended.unwrap_or(StageEndReason::AllFound)))
            .unwrap_or((0, StageEndReason::AllFound));
        self.phase = Phase::FinishedStage {
            reason,
            step: CompletionStep::Finishing,
        };
        let ticket = self.next_ticket(index);
        self.pending_finish = Some(ticket.seq);
        info!(play_time_ms = self.total_play.as_millis() as u64, "finishing game");
        vec![Effect::FinishGame {
            ticket,
            game_id,
            play_time: self.total_play,
        }]
    }

    fn on_finish_replied(
        &mut self,
        ticket: Ticket,
        result: Result<FinishReply, ApiError>,
    ) -> Vec<Effect> {
        if ticket.epoch != self.epoch || self.pending_finish != Some(ticket.seq) {
            warn!(?ticket, "dropping stale finish reply");
            return Vec::new();
        }
        self.pending_finish = None;

        let final_score = match result {
            Ok(reply) => Some(reply.final_score),
            Err(err) => {
                warn!(%err, "finish failed; final score unknown");
                None
            }
        };
        self.terminate(GameOutcome::Finished { final_score })
    }

    /// Moves to game over. Every outstanding reply becomes stale.
    fn terminate(&mut self, outcome: GameOutcome) -> Vec<Effect> {
        info!(?outcome, "game over");
        self.epoch += 1;
        self.countdown.cancel();
        self.poller.cancel();
        self.pending_load = None;
        self.pending_checks.clear();
        self.completion = None;
        self.pending_finish = None;
        self.confirm_exit = false;
        self.stage = None;
        self.overlay.clear();
        self.game_id = None;

        let navigate = outcome == GameOutcome::Aborted;
        self.phase = Phase::GameOver { outcome };

        let mut effects = vec![Effect::ClearGameId];
        if navigate {
            effects.push(Effect::Navigate(Destination::Entry));
        }
        effects
    }
}

/// Rescales a pixel of the loaded image into puzzle space when the two sizes disagree.
fn to_puzzle_space(pixel: PixelPoint, image: Size, puzzle: Size) -> PixelPoint {
    if image == puzzle || image.is_degenerate() || puzzle.is_degenerate() {
        return pixel;
    }
    let x = (pixel.x as f64 * puzzle.width / image.width)
        .round()
        .clamp(0.0, puzzle.width);
    let y = (pixel.y as f64 * puzzle.height / image.height)
        .round()
        .clamp(0.0, puzzle.height);
    PixelPoint::new(x as u32, y as u32)
}
