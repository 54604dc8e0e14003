//! Typed seam between the stage runtime and the game server.
//!
//! `wire` holds the JSON shapes exactly as they travel over HTTP (shared with the mock
//! server). The runtime only ever sees the normalized reply types defined here.

use std::future::Future;
use std::time::Duration;

use engine::layout::PixelPoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{DEFAULT_REGION_SIDE, GameId, Puzzle, Region};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// 5xx, timeouts and connection failures. Retrying may help.
    #[error("temporary server failure: {0}")]
    Transient(String),
    /// 4xx other than 404, or a reply that does not match the protocol.
    #[error("malformed exchange with server: {0}")]
    Protocol(String),
    #[error("game not found")]
    NotFound,
}

impl ApiError {
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            404 => ApiError::NotFound,
            400..=499 => ApiError::Protocol(format!("HTTP {status}: {}", body.trim())),
            _ => ApiError::Transient(format!("HTTP {status}: {}", body.trim())),
        }
    }

    /// Fatal errors end the game; transient ones leave state untouched.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ApiError::Transient(_))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Protocol(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    WaitingUpload,
    WaitingPuzzle,
    WaitingNextStage,
    Playing,
    Finished,
    Completed,
    #[serde(other)]
    Unknown,
}

impl GameStatus {
    /// Statuses on a check reply that end the whole game.
    pub fn ends_game(self) -> bool {
        matches!(self, GameStatus::Completed | GameStatus::Finished)
    }
}

pub mod wire {
    use serde::{Deserialize, Serialize};

    use super::GameStatus;
    use crate::model::{GameId, Puzzle};

    /// Difference region as sent by the server. Some replies omit the size fields, or
    /// carry them as `box_width`/`box_height`.
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    pub struct Region {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub difference_id: Option<u64>,
        pub x: f64,
        pub y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub width: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub height: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub box_width: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub box_height: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub label: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    pub struct GameDetail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub game_id: Option<GameId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub status: Option<GameStatus>,
        #[serde(default)]
        pub puzzle: Option<Puzzle>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub current_stage: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub total_stages: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub current_score: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub found_differences: Option<Vec<Region>>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CheckRequest {
        pub x: u32,
        pub y: u32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct CheckReply {
        pub is_correct: bool,
        #[serde(default)]
        pub is_already_found: bool,
        #[serde(default)]
        pub found_differences: Vec<Region>,
        #[serde(default)]
        pub found_difference_count: u32,
        #[serde(default)]
        pub total_difference_count: u32,
        pub current_score: i64,
        pub game_status: GameStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub newly_hit_difference: Option<Region>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PlayTimeRequest {
        pub play_time_milliseconds: u64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct StageResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub game_id: Option<GameId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub stage_number: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub next_stage_number: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub total_stages: Option<u32>,
        pub status: GameStatus,
        #[serde(default)]
        pub current_score: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub found_difference_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub total_difference_count: Option<u32>,
        #[serde(default)]
        pub next_puzzle: Option<Puzzle>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct FinishReply {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub game_id: Option<GameId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub status: Option<GameStatus>,
        pub final_score: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub found_difference_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub total_difference_count: Option<u32>,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGameRequest {
    pub mode: String,
    pub difficulty: String,
    pub time_limit_seconds: u32,
    pub requested_slot_count: u32,
}

impl CreateGameRequest {
    pub fn single(slot_count: u32) -> Self {
        Self {
            mode: "single".to_string(),
            difficulty: "easy".to_string(),
            time_limit_seconds: crate::model::STAGE_DURATION.as_secs() as u32,
            requested_slot_count: slot_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSlot {
    pub slot: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGameReply {
    pub game_id: GameId,
    #[serde(default)]
    pub upload_slots: Vec<UploadSlot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameDetail {
    pub game_id: Option<GameId>,
    pub status: Option<GameStatus>,
    /// `None` means the server has no playable puzzle for this game.
    pub puzzle: Option<Puzzle>,
    pub current_stage: u32,
    pub total_stages: u32,
    pub current_score: i64,
    pub found: Vec<Region>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckReply {
    pub is_correct: bool,
    pub is_already_found: bool,
    pub found: Vec<Region>,
    pub found_difference_count: u32,
    pub total_difference_count: u32,
    pub current_score: i64,
    pub game_status: GameStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub status: GameStatus,
    pub stage_number: Option<u32>,
    pub next_stage_number: Option<u32>,
    pub total_stages: Option<u32>,
    pub current_score: i64,
    pub next_puzzle: Option<Puzzle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishReply {
    pub final_score: i64,
}

/// Fills in a default box for regions sent without a size.
pub fn normalize_region(raw: wire::Region) -> Region {
    Region {
        difference_id: raw.difference_id,
        x: raw.x.max(0.0),
        y: raw.y.max(0.0),
        width: raw.width.or(raw.box_width).unwrap_or(DEFAULT_REGION_SIDE),
        height: raw.height.or(raw.box_height).unwrap_or(DEFAULT_REGION_SIDE),
    }
}

fn validate_puzzle(puzzle: Puzzle) -> Result<Puzzle, ApiError> {
    if puzzle.width == 0 || puzzle.height == 0 {
        return Err(ApiError::Protocol(format!(
            "puzzle has empty dimensions {}x{}",
            puzzle.width, puzzle.height
        )));
    }
    Ok(puzzle)
}

impl TryFrom<wire::GameDetail> for GameDetail {
    type Error = ApiError;

    fn try_from(raw: wire::GameDetail) -> Result<Self, Self::Error> {
        Ok(Self {
            game_id: raw.game_id,
            status: raw.status,
            puzzle: raw.puzzle.map(validate_puzzle).transpose()?,
            current_stage: raw.current_stage.unwrap_or(0),
            total_stages: raw.total_stages.unwrap_or(1).max(1),
            current_score: raw.current_score.unwrap_or(0),
            found: raw
                .found_differences
                .unwrap_or_default()
                .into_iter()
                .map(normalize_region)
                .collect(),
        })
    }
}

impl From<wire::CheckReply> for CheckReply {
    fn from(raw: wire::CheckReply) -> Self {
        Self {
            is_correct: raw.is_correct,
            is_already_found: raw.is_already_found,
            found: raw
                .found_differences
                .into_iter()
                .map(normalize_region)
                .collect(),
            found_difference_count: raw.found_difference_count,
            total_difference_count: raw.total_difference_count,
            current_score: raw.current_score,
            game_status: raw.game_status,
        }
    }
}

impl TryFrom<wire::StageResult> for StageResult {
    type Error = ApiError;

    fn try_from(raw: wire::StageResult) -> Result<Self, Self::Error> {
        Ok(Self {
            status: raw.status,
            stage_number: raw.stage_number,
            next_stage_number: raw.next_stage_number,
            total_stages: raw.total_stages,
            current_score: raw.current_score,
            next_puzzle: raw.next_puzzle.map(validate_puzzle).transpose()?,
        })
    }
}

impl From<wire::FinishReply> for FinishReply {
    fn from(raw: wire::FinishReply) -> Self {
        Self {
            final_score: raw.final_score,
        }
    }
}

/// The server operations the client core depends on.
///
/// Futures are not required to be `Send`: the client drives them on a single-threaded
/// event loop.
pub trait GameApi {
    fn create_game(
        &self,
        request: &CreateGameRequest,
    ) -> impl Future<Output = Result<CreateGameReply, ApiError>>;

    fn fetch_game(&self, game_id: &GameId) -> impl Future<Output = Result<GameDetail, ApiError>>;

    fn check(
        &self,
        game_id: &GameId,
        stage: u32,
        point: PixelPoint,
    ) -> impl Future<Output = Result<CheckReply, ApiError>>;

    /// Also used for readiness polling, with a zero play time.
    fn complete_stage(
        &self,
        game_id: &GameId,
        stage: u32,
        play_time: Duration,
    ) -> impl Future<Output = Result<StageResult, ApiError>>;

    fn finish(
        &self,
        game_id: &GameId,
        play_time: Duration,
    ) -> impl Future<Output = Result<FinishReply, ApiError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert_eq!(ApiError::from_status(404, ""), ApiError::NotFound);
        assert!(matches!(
            ApiError::from_status(422, "bad"),
            ApiError::Protocol(_)
        ));
        assert!(matches!(
            ApiError::from_status(503, "down"),
            ApiError::Transient(_)
        ));
        assert!(!ApiError::Transient(String::new()).is_fatal());
        assert!(ApiError::NotFound.is_fatal());
    }

    #[test]
    fn regions_without_size_get_the_default_box() {
        let raw: wire::Region = serde_json::from_str(r#"{"x":10,"y":20}"#).unwrap();
        let region = normalize_region(raw);
        assert_eq!((region.width, region.height), (100.0, 100.0));

        let raw: wire::Region =
            serde_json::from_str(r#"{"x":10,"y":20,"box_width":30,"box_height":40}"#).unwrap();
        let region = normalize_region(raw);
        assert_eq!((region.width, region.height), (30.0, 40.0));

        let raw: wire::Region = serde_json::from_str(
            r#"{"x":10,"y":20,"width":5,"height":6,"box_width":30,"box_height":40}"#,
        )
        .unwrap();
        let region = normalize_region(raw);
        assert_eq!((region.width, region.height), (5.0, 6.0));
    }

    #[test]
    fn unknown_status_values_do_not_fail_parsing() {
        let status: GameStatus = serde_json::from_str("\"rebooting\"").unwrap();
        assert_eq!(status, GameStatus::Unknown);
        let status: GameStatus = serde_json::from_str("\"waiting_next_stage\"").unwrap();
        assert_eq!(status, GameStatus::WaitingNextStage);
    }

    #[test]
    fn check_reply_requires_core_fields() {
        let missing = serde_json::from_str::<wire::CheckReply>(r#"{"is_correct":true}"#);
        assert!(missing.is_err());

        let reply: wire::CheckReply = serde_json::from_str(
            r#"{"is_correct":true,"current_score":100,"game_status":"playing",
                "found_differences":[{"difference_id":1,"x":90.0,"y":90.0,"width":20.0,"height":20.0}],
                "found_difference_count":1,"total_difference_count":2}"#,
        )
        .unwrap();
        let reply = CheckReply::from(reply);
        assert_eq!(reply.found.len(), 1);
        assert!(!reply.is_already_found);
    }

    #[test]
    fn game_detail_without_puzzle_is_kept_for_the_runtime_to_reject() {
        let raw: wire::GameDetail =
            serde_json::from_str(r#"{"game_id":42,"status":"waiting_puzzle","current_score":0}"#)
                .unwrap();
        let detail = GameDetail::try_from(raw).unwrap();
        assert!(detail.puzzle.is_none());
        assert_eq!(detail.total_stages, 1);
    }

    #[test]
    fn zero_sized_puzzle_is_a_protocol_error() {
        let raw: wire::GameDetail =
            serde_json::from_str(r#"{"puzzle":{"width":0,"height":600}}"#).unwrap();
        assert!(matches!(
            GameDetail::try_from(raw),
            Err(ApiError::Protocol(_))
        ));
    }
}
