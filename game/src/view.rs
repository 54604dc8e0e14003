//! Pure projection of the runtime snapshot into what the player sees, plus the terminal
//! rendering and input parsing used by the `spotdiff` binary.

use std::fmt::Write as _;
use std::time::Duration;

use engine::layout::{Letterbox, PercentPoint, PercentRect, PixelRect, Point, Size};
use serde::Serialize;
use thiserror::Error;

use crate::model::{ImageSide, MissMarker, Puzzle, Region, StageEndReason, TIMER_WARNING};
use crate::runtime::{CompletionStep, GameOutcome, Intent, Phase, RuntimeSnapshot};

pub const GAME_OVER_HEADING: &str = "게임 종료!";
pub const WAITING_LABEL: &str = "다음 게임 준비 중...";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImagePane {
    pub side: ImageSide,
    pub image_url: String,
    pub found: Vec<PercentRect>,
    pub misses: Vec<PercentPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayView {
    pub timer: String,
    pub timer_warning: bool,
    pub lives: u32,
    pub stage_progress: String,
    pub find_progress: String,
    pub score: i64,
    pub panes: [ImagePane; 2],
    pub puzzle_size: Size,
    pub confirm_exit: bool,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameOverView {
    pub heading: &'static str,
    pub score_label: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Screen {
    Entry,
    Loading {
        notice: Option<String>,
    },
    Play(PlayView),
    StageEnding {
        reason: StageEndReason,
        failed: bool,
        notice: Option<String>,
    },
    Waiting {
        stage_progress: String,
        score: i64,
    },
    GameOver(GameOverView),
}

/// `M:SS`, rounding partial seconds up so the display reaches `0:00` only at expiry.
pub fn format_timer(remaining: Duration) -> String {
    let secs = remaining.as_millis().div_ceil(1_000) as u64;
    format!("{}:{:02}", secs / 60, secs % 60)
}

pub fn score_label(final_score: Option<i64>) -> String {
    match final_score {
        Some(score) => format!("최종 점수: {score}"),
        None => "최종 점수: —".to_string(),
    }
}

pub fn project(snapshot: &RuntimeSnapshot) -> Screen {
    let stage_progress = format!(
        "{} / {}",
        snapshot.stage_index + 1,
        snapshot.total_stages.max(1)
    );

    match &snapshot.phase {
        Phase::Loading => Screen::Loading {
            notice: snapshot.notice.clone(),
        },
        Phase::Playing => match &snapshot.puzzle {
            Some(puzzle) => Screen::Play(play_view(snapshot, puzzle, stage_progress)),
            None => Screen::Loading {
                notice: snapshot.notice.clone(),
            },
        },
        Phase::FinishedStage { reason, step } => Screen::StageEnding {
            reason: *reason,
            failed: *step == CompletionStep::Failed,
            notice: snapshot.notice.clone(),
        },
        Phase::AwaitingNext => Screen::Waiting {
            stage_progress,
            score: snapshot.current_score,
        },
        Phase::GameOver { outcome } => match outcome {
            GameOutcome::Aborted => Screen::Entry,
            GameOutcome::Finished { final_score } => Screen::GameOver(GameOverView {
                heading: GAME_OVER_HEADING,
                score_label: score_label(*final_score),
                message: None,
            }),
            GameOutcome::Failed { message } => Screen::GameOver(GameOverView {
                heading: GAME_OVER_HEADING,
                score_label: score_label(None),
                message: Some(message.clone()),
            }),
        },
    }
}

fn play_view(snapshot: &RuntimeSnapshot, puzzle: &Puzzle, stage_progress: String) -> PlayView {
    let panes = ImageSide::ALL.map(|side| ImagePane {
        side,
        image_url: puzzle.image_url(side).to_string(),
        found: snapshot
            .found
            .iter()
            .map(|region| project_region(region, puzzle, snapshot.layouts[side.index()]))
            .collect(),
        misses: snapshot
            .misses
            .iter()
            .map(|miss| project_miss(miss, puzzle, snapshot.layouts[side.index()]))
            .collect(),
    });

    PlayView {
        timer: format_timer(snapshot.time_remaining),
        timer_warning: snapshot.time_remaining <= TIMER_WARNING,
        lives: snapshot.lives,
        stage_progress,
        find_progress: format!(
            "{} / {}",
            snapshot.found.len(),
            puzzle.total_difference_count
        ),
        score: snapshot.current_score,
        panes,
        puzzle_size: puzzle.size(),
        confirm_exit: snapshot.confirm_exit,
        notice: snapshot.notice.clone(),
    }
}

fn scale_to_image(puzzle: &Puzzle, layout: &Letterbox) -> (f64, f64) {
    let size = puzzle.size();
    if size.is_degenerate() {
        return (1.0, 1.0);
    }
    (
        layout.image().width / size.width,
        layout.image().height / size.height,
    )
}

fn project_region(region: &Region, puzzle: &Puzzle, layout: Option<Letterbox>) -> PercentRect {
    match layout {
        Some(layout) => {
            let (sx, sy) = scale_to_image(puzzle, &layout);
            layout.project_rect(PixelRect::new(
                region.x * sx,
                region.y * sy,
                region.width * sx,
                region.height * sy,
            ))
        }
        // No layout yet: assume the image fills its box exactly.
        None => {
            let size = puzzle.size();
            PercentRect {
                left: region.x / size.width * 100.0,
                top: region.y / size.height * 100.0,
                width: region.width / size.width * 100.0,
                height: region.height / size.height * 100.0,
            }
        }
    }
}

fn project_miss(miss: &MissMarker, puzzle: &Puzzle, layout: Option<Letterbox>) -> PercentPoint {
    let (x, y) = (miss.at.x as f64, miss.at.y as f64);
    match layout {
        Some(layout) => {
            let (sx, sy) = scale_to_image(puzzle, &layout);
            layout.project_point(Point::new(x * sx, y * sy))
        }
        None => {
            let size = puzzle.size();
            PercentPoint {
                left: x / size.width * 100.0,
                top: y / size.height * 100.0,
            }
        }
    }
}

pub fn render_text(screen: &Screen) -> String {
    let mut out = String::new();
    match screen {
        Screen::Entry => out.push_str("메인 화면으로 돌아갑니다.\n"),
        Screen::Loading { notice } => {
            out.push_str("불러오는 중...\n");
            push_notice(&mut out, notice);
        }
        Screen::Play(view) => {
            let warn = if view.timer_warning { " !" } else { "" };
            let _ = writeln!(
                out,
                "게임 {} | 남은 시간 {}{} | 목숨 {} | 찾은 개수 {} | 현재 점수 {}",
                view.stage_progress,
                view.timer,
                warn,
                view.lives,
                view.find_progress,
                view.score
            );
            let _ = writeln!(
                out,
                "퍼즐 크기 {}x{}",
                view.puzzle_size.width, view.puzzle_size.height
            );
            for pane in &view.panes {
                let _ = writeln!(out, "[{}] {}", pane.side.label(), pane.image_url);
                for rect in &pane.found {
                    let _ = writeln!(
                        out,
                        "  O {:.1}% {:.1}% ({:.1}% x {:.1}%)",
                        rect.left, rect.top, rect.width, rect.height
                    );
                }
                for miss in &pane.misses {
                    let _ = writeln!(out, "  X {:.1}% {:.1}%", miss.left, miss.top);
                }
            }
            if view.confirm_exit {
                out.push_str("게임을 종료하시겠습니까? (yes / no)\n");
            }
            push_notice(&mut out, &view.notice);
        }
        Screen::StageEnding {
            reason,
            failed,
            notice,
        } => {
            let _ = writeln!(out, "{}", reason.label());
            if *failed {
                out.push_str("결과 전송 실패 (retry / exit)\n");
            }
            push_notice(&mut out, notice);
        }
        Screen::Waiting {
            stage_progress,
            score,
        } => {
            let _ = writeln!(out, "{WAITING_LABEL}");
            let _ = writeln!(out, "게임 {stage_progress} | 현재 점수 {score}");
        }
        Screen::GameOver(view) => {
            let _ = writeln!(out, "{}", view.heading);
            let _ = writeln!(out, "{}", view.score_label);
            if let Some(message) = &view.message {
                let _ = writeln!(out, "{message}");
            }
        }
    }
    out
}

fn push_notice(out: &mut String, notice: &Option<String>) {
    if let Some(notice) = notice {
        let _ = writeln!(out, "* {notice}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIntentError {
    #[error("empty input")]
    Empty,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("unknown image side `{0}` (expected original or modified)")]
    UnknownSide(String),
    #[error("`{command}` expects {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
}

/// Parses one line of terminal input.
///
/// `click <side> x y`, `resize <side> w h`, `load <side> w h`, `exit`, `yes`, `no`,
/// `retry` and `back`.
pub fn parse_intent(line: &str) -> Result<Intent, ParseIntentError> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Err(ParseIntentError::Empty);
    };
    let args: Vec<&str> = parts.collect();

    match command.to_ascii_lowercase().as_str() {
        "click" => {
            let (side, x, y) = side_and_pair("click", "<side> <x> <y>", &args)?;
            Ok(Intent::Click {
                side,
                point: Point::new(x, y),
            })
        }
        "resize" => {
            let (side, w, h) = side_and_pair("resize", "<side> <width> <height>", &args)?;
            Ok(Intent::Resize {
                side,
                bounds: Size::new(w, h),
            })
        }
        "load" => {
            let (side, w, h) = side_and_pair("load", "<side> <width> <height>", &args)?;
            Ok(Intent::ImageLoaded {
                side,
                intrinsic: Size::new(w, h),
            })
        }
        "exit" | "quit" => Ok(Intent::RequestExit),
        "yes" | "y" => Ok(Intent::ConfirmExit),
        "no" | "n" => Ok(Intent::DismissExit),
        "retry" => Ok(Intent::Retry),
        "back" => Ok(Intent::Back),
        other => Err(ParseIntentError::UnknownCommand(other.to_string())),
    }
}

fn side_and_pair(
    command: &'static str,
    expected: &'static str,
    args: &[&str],
) -> Result<(ImageSide, f64, f64), ParseIntentError> {
    let [side, a, b] = args else {
        return Err(ParseIntentError::MissingArgument { command, expected });
    };
    Ok((parse_side(side)?, parse_number(a)?, parse_number(b)?))
}

fn parse_side(raw: &str) -> Result<ImageSide, ParseIntentError> {
    match raw.to_ascii_lowercase().as_str() {
        "original" | "o" | "left" => Ok(ImageSide::Original),
        "modified" | "m" | "right" => Ok(ImageSide::Modified),
        _ => Err(ParseIntentError::UnknownSide(raw.to_string())),
    }
}

fn parse_number(raw: &str) -> Result<f64, ParseIntentError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseIntentError::InvalidNumber(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::clock::Millis;
    use engine::layout::PixelPoint;

    use crate::model::MissId;

    fn puzzle() -> Puzzle {
        Puzzle {
            puzzle_id: Some(1),
            width: 800,
            height: 600,
            original_image_url: "o.png".to_string(),
            modified_image_url: "m.png".to_string(),
            total_difference_count: 2,
        }
    }

    fn playing(time_remaining: Duration) -> RuntimeSnapshot {
        RuntimeSnapshot {
            phase: Phase::Playing,
            stage_index: 0,
            total_stages: 3,
            lives: 7,
            time_remaining,
            found: vec![Region {
                difference_id: Some(1),
                x: 80.0,
                y: 60.0,
                width: 80.0,
                height: 60.0,
            }],
            misses: vec![MissMarker {
                id: MissId(0),
                at: PixelPoint::new(400, 300),
                expires_at: Millis(1_000),
            }],
            current_score: 100,
            puzzle: Some(puzzle()),
            final_score: None,
            layouts: [None, None],
            confirm_exit: false,
            notice: None,
        }
    }

    #[test]
    fn timer_formats_minutes_and_rounds_up() {
        assert_eq!(format_timer(Duration::from_secs(180)), "3:00");
        assert_eq!(format_timer(Duration::from_millis(59_001)), "1:00");
        assert_eq!(format_timer(Duration::from_millis(9_500)), "0:10");
        assert_eq!(format_timer(Duration::ZERO), "0:00");
    }

    #[test]
    fn play_view_shows_progress_and_warning() {
        let Screen::Play(view) = project(&playing(Duration::from_secs(30))) else {
            panic!("expected play screen");
        };
        assert_eq!(view.timer, "0:30");
        assert!(view.timer_warning);
        assert_eq!(view.stage_progress, "1 / 3");
        assert_eq!(view.find_progress, "1 / 2");
        assert_eq!(view.panes[1].image_url, "m.png");

        let Screen::Play(view) = project(&playing(Duration::from_secs(31))) else {
            panic!("expected play screen");
        };
        assert!(!view.timer_warning);
    }

    #[test]
    fn overlays_fall_back_to_puzzle_proportions_without_layout() {
        let Screen::Play(view) = project(&playing(Duration::from_secs(100))) else {
            panic!("expected play screen");
        };
        let rect = view.panes[0].found[0];
        assert_eq!(
            rect,
            PercentRect {
                left: 10.0,
                top: 10.0,
                width: 10.0,
                height: 10.0
            }
        );
        assert_eq!(
            view.panes[0].misses[0],
            PercentPoint {
                left: 50.0,
                top: 50.0
            }
        );
    }

    #[test]
    fn overlays_use_the_letterbox_when_known() {
        let mut snapshot = playing(Duration::from_secs(100));
        // 800x600 image in a 1000x600 box: 100px bands left and right.
        snapshot.layouts[0] = Letterbox::fit(Size::new(800.0, 600.0), Size::new(1000.0, 600.0));
        let Screen::Play(view) = project(&snapshot) else {
            panic!("expected play screen");
        };
        let miss = view.panes[0].misses[0];
        assert!((miss.left - 50.0).abs() < 1e-9);
        let rect = view.panes[0].found[0];
        assert!((rect.left - 18.0).abs() < 1e-9, "{rect:?}");
        assert!((rect.width - 8.0).abs() < 1e-9, "{rect:?}");
    }

    #[test]
    fn game_over_labels() {
        let mut snapshot = playing(Duration::ZERO);
        snapshot.phase = Phase::GameOver {
            outcome: GameOutcome::Finished {
                final_score: Some(250),
            },
        };
        let screen = project(&snapshot);
        let Screen::GameOver(view) = &screen else {
            panic!("expected game over");
        };
        assert_eq!(view.score_label, "최종 점수: 250");
        assert!(render_text(&screen).contains("게임 종료!"));

        snapshot.phase = Phase::GameOver {
            outcome: GameOutcome::Finished { final_score: None },
        };
        let Screen::GameOver(view) = project(&snapshot) else {
            panic!("expected game over");
        };
        assert_eq!(view.score_label, "최종 점수: —");

        snapshot.phase = Phase::GameOver {
            outcome: GameOutcome::Aborted,
        };
        assert_eq!(project(&snapshot), Screen::Entry);
    }

    #[test]
    fn waiting_screen_renders_the_waiting_label() {
        let mut snapshot = playing(Duration::ZERO);
        snapshot.phase = Phase::AwaitingNext;
        let text = render_text(&project(&snapshot));
        assert!(text.contains(WAITING_LABEL));
        assert!(text.contains("게임 1 / 3"));
    }

    #[test]
    fn parses_terminal_commands() {
        assert_eq!(
            parse_intent("click modified 10 20.5"),
            Ok(Intent::Click {
                side: ImageSide::Modified,
                point: Point::new(10.0, 20.5)
            })
        );
        assert_eq!(
            parse_intent("  load o 800 600 "),
            Ok(Intent::ImageLoaded {
                side: ImageSide::Original,
                intrinsic: Size::new(800.0, 600.0)
            })
        );
        assert_eq!(parse_intent("exit"), Ok(Intent::RequestExit));
        assert_eq!(parse_intent("YES"), Ok(Intent::ConfirmExit));
        assert_eq!(parse_intent(""), Err(ParseIntentError::Empty));
        assert!(matches!(
            parse_intent("click sideways 1 2"),
            Err(ParseIntentError::UnknownSide(_))
        ));
        assert!(matches!(
            parse_intent("resize original 10"),
            Err(ParseIntentError::MissingArgument { .. })
        ));
        assert!(matches!(
            parse_intent("click original NaN 2"),
            Err(ParseIntentError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_intent("dance"),
            Err(ParseIntentError::UnknownCommand(_))
        ));
    }
}
