//! Deterministic in-memory game server speaking the `/api/v1` JSON surface.
//!
//! Backs the `spotdiff-mock-server` binary for local play and the HTTP gateway tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::api::{CreateGameReply, CreateGameRequest, GameStatus, UploadSlot, wire};
use crate::model::{GameId, Puzzle, Region};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Debug, Clone, PartialEq)]
pub struct MockConfig {
    pub stages: u32,
    /// `waiting_next_stage` replies sent before each next puzzle becomes ready.
    pub waiting_polls: u32,
    /// Send found regions without `width`/`height`.
    pub regions_without_size: bool,
    pub width: u32,
    pub height: u32,
    pub differences: Vec<Region>,
}

impl MockConfig {
    pub fn demo() -> Self {
        Self {
            stages: 3,
            waiting_polls: 2,
            regions_without_size: false,
            width: 800,
            height: 600,
            differences: vec![
                region(1, 90.0, 90.0, 20.0, 20.0),
                region(2, 495.0, 395.0, 20.0, 20.0),
                region(3, 300.0, 180.0, 40.0, 30.0),
            ],
        }
    }

    fn puzzle(&self, game_id: u64, stage: u32) -> Puzzle {
        let puzzle_id = game_id * 100 + u64::from(stage);
        Puzzle {
            puzzle_id: Some(puzzle_id),
            width: self.width,
            height: self.height,
            original_image_url: format!("/mock/puzzles/{puzzle_id}/original.png"),
            modified_image_url: format!("/mock/puzzles/{puzzle_id}/modified.png"),
            total_difference_count: self.differences.len() as u32,
        }
    }

    fn wire_region(&self, region: &Region) -> wire::Region {
        let (width, height) = if self.regions_without_size {
            (None, None)
        } else {
            (Some(region.width), Some(region.height))
        };
        wire::Region {
            difference_id: region.difference_id,
            x: region.x,
            y: region.y,
            width,
            height,
            ..wire::Region::default()
        }
    }
}

fn region(id: u64, x: f64, y: f64, width: f64, height: f64) -> Region {
    Region {
        difference_id: Some(id),
        x,
        y,
        width,
        height,
    }
}

#[derive(Debug, Clone, PartialEq)]
struct MockGame {
    stage: u32,
    score: i64,
    found: Vec<usize>,
    polls_left: u32,
    status: GameStatus,
    play_time_ms: u64,
}

#[derive(Debug)]
struct Inner {
    config: MockConfig,
    games: BTreeMap<u64, MockGame>,
    next_id: u64,
}

#[derive(Debug, Clone)]
pub struct MockState {
    inner: Arc<Mutex<Inner>>,
}

impl MockState {
    pub fn new(config: MockConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                games: BTreeMap::new(),
                next_id: 1,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a game that is ready to play and returns its id.
    pub fn insert_game(&self) -> GameId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let game = MockGame {
            stage: 0,
            score: 0,
            found: Vec::new(),
            polls_left: inner.config.waiting_polls,
            status: GameStatus::Playing,
            play_time_ms: 0,
        };
        inner.games.insert(id, game);
        GameId::new(id.to_string())
    }

    pub fn game_count(&self) -> usize {
        self.lock().games.len()
    }

    /// Total play time reported by the client so far, if the game exists.
    pub fn play_time_ms(&self, game_id: u64) -> Option<u64> {
        self.lock().games.get(&game_id).map(|g| g.play_time_ms)
    }
}

fn not_found(game_id: u64) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("game {game_id} not found"))
}

pub fn router(state: MockState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/v1/games", post(create_game))
        .route("/api/v1/games/:game_id", get(game_detail))
        .route("/api/v1/games/:game_id/stages/:stage/check", post(check))
        .route("/api/v1/games/:game_id/stages/:stage/complete", post(complete))
        .route("/api/v1/games/:game_id/finish", post(finish))
        .with_state(state)
        .layer(cors)
}

async fn health() -> &'static str {
    "ok"
}

async fn create_game(
    State(state): State<MockState>,
    Json(payload): Json<CreateGameRequest>,
) -> Json<CreateGameReply> {
    let game_id = state.insert_game();
    info!(%game_id, mode = %payload.mode, "created game");
    let upload_slots = (0..payload.requested_slot_count)
        .map(|slot| UploadSlot {
            slot,
            presigned_url: Some(format!("/mock/uploads/{game_id}/{slot}")),
        })
        .collect();
    Json(CreateGameReply {
        game_id,
        upload_slots,
    })
}

async fn game_detail(
    State(state): State<MockState>,
    Path(game_id): Path<u64>,
) -> ApiResult<wire::GameDetail> {
    let inner = state.lock();
    let game = inner.games.get(&game_id).ok_or_else(|| not_found(game_id))?;
    let config = &inner.config;

    let playable = game.status != GameStatus::Finished;
    Ok(Json(wire::GameDetail {
        game_id: Some(GameId::new(game_id.to_string())),
        status: Some(game.status),
        puzzle: playable.then(|| config.puzzle(game_id, game.stage)),
        current_stage: Some(game.stage),
        total_stages: Some(config.stages),
        current_score: Some(game.score),
        found_differences: Some(
            game.found
                .iter()
                .map(|i| config.wire_region(&config.differences[*i]))
                .collect(),
        ),
    }))
}

async fn check(
    State(state): State<MockState>,
    Path((game_id, stage)): Path<(u64, u32)>,
    Json(payload): Json<wire::CheckRequest>,
) -> ApiResult<wire::CheckReply> {
    let mut inner = state.lock();
    let Inner { config, games, .. } = &mut *inner;
    let game = games.get_mut(&game_id).ok_or_else(|| not_found(game_id))?;
    if game.stage != stage {
        return Err((
            StatusCode::CONFLICT,
            format!("stage {stage} is not the current stage"),
        ));
    }

    let hit = config
        .differences
        .iter()
        .position(|d| d.rect().contains(payload.x as f64, payload.y as f64));
    let already = hit.is_some_and(|i| game.found.contains(&i));
    if let Some(i) = hit.filter(|_| !already) {
        game.found.push(i);
        game.score += 100;
    }
    debug!(game_id, stage, x = payload.x, y = payload.y, ?hit, already, "check");

    let total = config.differences.len() as u32;
    Ok(Json(wire::CheckReply {
        is_correct: hit.is_some(),
        is_already_found: already,
        found_differences: game
            .found
            .iter()
            .map(|i| config.wire_region(&config.differences[*i]))
            .collect(),
        found_difference_count: game.found.len() as u32,
        total_difference_count: total,
        current_score: game.score,
        game_status: game.status,
        newly_hit_difference: hit
            .filter(|_| !already)
            .map(|i| config.wire_region(&config.differences[i])),
    }))
}

async fn complete(
    State(state): State<MockState>,
    Path((game_id, stage)): Path<(u64, u32)>,
    Json(payload): Json<wire::PlayTimeRequest>,
) -> ApiResult<wire::StageResult> {
    let mut inner = state.lock();
    let Inner { config, games, .. } = &mut *inner;
    let game = games.get_mut(&game_id).ok_or_else(|| not_found(game_id))?;
    if game.stage != stage {
        return Err((
            StatusCode::CONFLICT,
            format!("stage {stage} is not the current stage"),
        ));
    }
    game.play_time_ms += payload.play_time_milliseconds;

    let total = config.differences.len() as u32;
    let mut result = wire::StageResult {
        game_id: Some(GameId::new(game_id.to_string())),
        stage_number: Some(stage),
        next_stage_number: None,
        total_stages: Some(config.stages),
        status: GameStatus::WaitingNextStage,
        current_score: game.score,
        found_difference_count: Some(game.found.len() as u32),
        total_difference_count: Some(total),
        next_puzzle: None,
    };

    if stage + 1 >= config.stages {
        result.status = GameStatus::Finished;
    } else if game.polls_left > 0 {
        game.polls_left -= 1;
        game.status = GameStatus::WaitingNextStage;
    } else {
        game.stage += 1;
        game.found.clear();
        game.polls_left = config.waiting_polls;
        game.status = GameStatus::Playing;
        result.status = GameStatus::Playing;
        result.next_stage_number = Some(game.stage);
        result.next_puzzle = Some(config.puzzle(game_id, game.stage));
    }
    debug!(game_id, stage, status = ?result.status, "complete");
    Ok(Json(result))
}

async fn finish(
    State(state): State<MockState>,
    Path(game_id): Path<u64>,
    Json(payload): Json<wire::PlayTimeRequest>,
) -> ApiResult<wire::FinishReply> {
    let mut inner = state.lock();
    let total = inner.config.differences.len() as u32;
    let game = inner
        .games
        .get_mut(&game_id)
        .ok_or_else(|| not_found(game_id))?;
    game.status = GameStatus::Finished;
    info!(
        game_id,
        score = game.score,
        play_time_ms = payload.play_time_milliseconds,
        "game finished"
    );
    Ok(Json(wire::FinishReply {
        game_id: Some(GameId::new(game_id.to_string())),
        status: Some(GameStatus::Finished),
        final_score: game.score,
        found_difference_count: Some(game.found.len() as u32),
        total_difference_count: Some(total),
    }))
}
