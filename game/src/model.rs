use std::fmt;
use std::time::Duration;

use engine::clock::Millis;
use engine::layout::{PixelPoint, PixelRect, Size};
use serde::{Deserialize, Deserializer, Serialize};

pub const LIVES_INITIAL: u32 = 10;
pub const STAGE_DURATION: Duration = Duration::from_secs(180);
pub const MISS_TTL: Duration = Duration::from_millis(1_000);
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const NOTICE_TTL: Duration = Duration::from_secs(3);
/// Remaining time at or below which the timer is shown as urgent.
pub const TIMER_WARNING: Duration = Duration::from_secs(30);
/// Side length used for difference regions the server sends without a size.
pub const DEFAULT_REGION_SIDE: f64 = 100.0;

/// Opaque server-assigned game identifier. The server may send it as a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for GameId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => GameId(text),
            Raw::Number(n) => GameId(n.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Puzzle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puzzle_id: Option<u64>,
    #[serde(with = "crate::serde_pixels")]
    pub width: u32,
    #[serde(with = "crate::serde_pixels")]
    pub height: u32,
    #[serde(default)]
    pub original_image_url: String,
    #[serde(default)]
    pub modified_image_url: String,
    #[serde(default)]
    pub total_difference_count: u32,
}

impl Puzzle {
    pub fn size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }

    pub fn image_url(&self, side: ImageSide) -> &str {
        match side {
            ImageSide::Original => &self.original_image_url,
            ImageSide::Modified => &self.modified_image_url,
        }
    }
}

/// A difference the server has confirmed as found, in puzzle pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difference_id: Option<u64>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    pub fn rect(&self) -> PixelRect {
        PixelRect::new(self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MissId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissMarker {
    pub id: MissId,
    pub at: PixelPoint,
    pub expires_at: Millis,
}

impl MissMarker {
    pub fn is_visible(&self, now: Millis) -> bool {
        now < self.expires_at
    }
}

/// The two images are rendered independently; each has its own layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSide {
    Original,
    Modified,
}

impl ImageSide {
    pub const ALL: [ImageSide; 2] = [ImageSide::Original, ImageSide::Modified];

    pub fn index(self) -> usize {
        match self {
            ImageSide::Original => 0,
            ImageSide::Modified => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ImageSide::Original => "원본 이미지",
            ImageSide::Modified => "틀린그림 이미지",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageEndReason {
    AllFound,
    TimeUp,
    LivesExhausted,
}

impl StageEndReason {
    pub fn label(self) -> &'static str {
        match self {
            StageEndReason::AllFound => "모든 차이를 찾았습니다!",
            StageEndReason::TimeUp => "시간 초과!",
            StageEndReason::LivesExhausted => "목숨을 모두 소진했습니다.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_id_accepts_numbers_and_strings() {
        let a: GameId = serde_json::from_str("42").unwrap();
        let b: GameId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"42\"");
    }

    #[test]
    fn puzzle_dimensions_accept_float_json() {
        let puzzle: Puzzle = serde_json::from_str(
            r#"{"puzzle_id":10,"modified_image_url":"m.png","width":1024.0,"height":768,"total_difference_count":7}"#,
        )
        .unwrap();
        assert_eq!((puzzle.width, puzzle.height), (1024, 768));
        assert_eq!(puzzle.original_image_url, "");
        assert_eq!(puzzle.image_url(ImageSide::Modified), "m.png");
    }

    #[test]
    fn negative_dimensions_are_rejected() {
        let parsed = serde_json::from_str::<Puzzle>(r#"{"width":-1,"height":10}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn miss_marker_visibility_is_strict() {
        let marker = MissMarker {
            id: MissId(0),
            at: PixelPoint::new(1, 1),
            expires_at: Millis(1_000),
        };
        assert!(marker.is_visible(Millis(999)));
        assert!(!marker.is_visible(Millis(1_000)));
    }
}
