use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use engine::kv::MemoryStore;
use engine::layout::{PixelPoint, Point};
use spotdiff::api::{
    ApiError, CheckReply, CreateGameReply, CreateGameRequest, FinishReply, GameApi, GameDetail,
    GameStatus, StageResult,
};
use spotdiff::driver::{Driver, DriverOptions};
use spotdiff::model::{GameId, ImageSide, Puzzle, Region, STAGE_DURATION};
use spotdiff::runtime::{GameOutcome, Intent, Phase};
use spotdiff::session::Session;
use spotdiff::view::Screen;
use tokio::sync::mpsc;
use tokio::time::sleep;

const LATENCY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Fetch(GameId),
    Check(u32, PixelPoint),
    Complete(u32, Duration),
    Finish(Duration),
}

#[derive(Default)]
struct Script {
    details: VecDeque<Result<GameDetail, ApiError>>,
    checks: VecDeque<Result<CheckReply, ApiError>>,
    completions: VecDeque<Result<StageResult, ApiError>>,
    finishes: VecDeque<Result<FinishReply, ApiError>>,
    calls: Vec<Call>,
}

/// Replays canned replies after a fixed latency and records every request.
#[derive(Clone, Default)]
struct ScriptedApi {
    script: Rc<RefCell<Script>>,
}

impl ScriptedApi {
    fn calls(&self) -> Vec<Call> {
        self.script.borrow().calls.clone()
    }

    async fn answer<T>(
        &self,
        call: Call,
        pick: impl FnOnce(&mut Script) -> Option<Result<T, ApiError>>,
    ) -> Result<T, ApiError> {
        self.script.borrow_mut().calls.push(call);
        sleep(LATENCY).await;
        pick(&mut self.script.borrow_mut())
            .unwrap_or_else(|| Err(ApiError::Transient("script exhausted".to_string())))
    }
}

impl GameApi for ScriptedApi {
    async fn create_game(&self, _request: &CreateGameRequest) -> Result<CreateGameReply, ApiError> {
        Err(ApiError::Protocol("not scripted".to_string()))
    }

    async fn fetch_game(&self, game_id: &GameId) -> Result<GameDetail, ApiError> {
        self.answer(Call::Fetch(game_id.clone()), |s| s.details.pop_front())
            .await
    }

    async fn check(
        &self,
        _game_id: &GameId,
        stage: u32,
        point: PixelPoint,
    ) -> Result<CheckReply, ApiError> {
        self.answer(Call::Check(stage, point), |s| s.checks.pop_front())
            .await
    }

    async fn complete_stage(
        &self,
        _game_id: &GameId,
        stage: u32,
        play_time: Duration,
    ) -> Result<StageResult, ApiError> {
        self.answer(Call::Complete(stage, play_time), |s| {
            s.completions.pop_front()
        })
        .await
    }

    async fn finish(&self, _game_id: &GameId, play_time: Duration) -> Result<FinishReply, ApiError> {
        self.answer(Call::Finish(play_time), |s| s.finishes.pop_front())
            .await
    }
}

fn puzzle(id: u64, total: u32) -> Puzzle {
    Puzzle {
        puzzle_id: Some(id),
        width: 800,
        height: 600,
        original_image_url: format!("/p/{id}/o.png"),
        modified_image_url: format!("/p/{id}/m.png"),
        total_difference_count: total,
    }
}

fn detail(puzzle: Puzzle, total_stages: u32) -> GameDetail {
    GameDetail {
        game_id: Some(GameId::new("42")),
        status: Some(GameStatus::Playing),
        puzzle: Some(puzzle),
        current_stage: 0,
        total_stages,
        current_score: 0,
        found: Vec::new(),
    }
}

fn stage_result(status: GameStatus, next_puzzle: Option<Puzzle>) -> StageResult {
    StageResult {
        status,
        stage_number: Some(0),
        next_stage_number: next_puzzle.as_ref().map(|_| 1),
        total_stages: None,
        current_score: 100,
        next_puzzle,
    }
}

fn session_with_game() -> Session<MemoryStore> {
    let mut session = Session::new(MemoryStore::new());
    session.ensure_session_id().unwrap();
    session.set_game_id(&GameId::new("42")).unwrap();
    session
}

fn options() -> DriverOptions {
    DriverOptions {
        assume_images_loaded: true,
        stop_on_game_over: true,
        ..DriverOptions::default()
    }
}

fn click(x: f64, y: f64) -> Intent {
    Intent::Click {
        side: ImageSide::Modified,
        point: Point::new(x, y),
    }
}

#[tokio::test(start_paused = true)]
async fn plays_a_single_stage_game_to_the_end() {
    let api = ScriptedApi::default();
    {
        let mut script = api.script.borrow_mut();
        script.details.push_back(Ok(detail(puzzle(1, 1), 1)));
        script.checks.push_back(Ok(CheckReply {
            is_correct: true,
            is_already_found: false,
            found: vec![Region {
                difference_id: Some(1),
                x: 90.0,
                y: 90.0,
                width: 20.0,
                height: 20.0,
            }],
            found_difference_count: 1,
            total_difference_count: 1,
            current_score: 100,
            game_status: GameStatus::Playing,
        }));
        script
            .completions
            .push_back(Ok(stage_result(GameStatus::Finished, None)));
        script
            .finishes
            .push_back(Ok(FinishReply { final_score: 100 }));
    }

    let (mut driver, screens) = Driver::new(api.clone(), session_with_game(), options());
    let (tx, rx) = mpsc::channel(8);
    let (outcome, _tx) = tokio::join!(driver.run(rx), async move {
        sleep(Duration::from_millis(500)).await;
        tx.send(click(100.0, 100.0)).await.unwrap();
        tx
    });

    assert_eq!(outcome.snapshot.final_score, Some(100));
    assert!(matches!(outcome.screen, Screen::GameOver(_)));
    assert_eq!(*screens.borrow(), outcome.screen);
    assert_eq!(driver.session().game_id(), None);
    assert!(driver.session().session_id().is_some());

    let calls = api.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0], Call::Fetch(GameId::new("42")));
    assert_eq!(calls[1], Call::Check(0, PixelPoint::new(100, 100)));
    let (Call::Complete(0, play_time), Call::Finish(total)) = (&calls[2], &calls[3]) else {
        panic!("unexpected calls {calls:?}");
    };
    assert!(!play_time.is_zero());
    assert_eq!(play_time, total);
}

#[tokio::test(start_paused = true)]
async fn ticks_run_the_stage_clock_out() {
    let api = ScriptedApi::default();
    {
        let mut script = api.script.borrow_mut();
        script.details.push_back(Ok(detail(puzzle(1, 3), 1)));
        script
            .completions
            .push_back(Ok(stage_result(GameStatus::Finished, None)));
        script.finishes.push_back(Ok(FinishReply { final_score: 0 }));
    }

    let (mut driver, _screens) = Driver::new(api.clone(), session_with_game(), options());
    let (_tx, rx) = mpsc::channel::<Intent>(8);
    let outcome = driver.run(rx).await;

    assert_eq!(
        outcome.snapshot.phase,
        Phase::GameOver {
            outcome: GameOutcome::Finished {
                final_score: Some(0)
            }
        }
    );
    let calls = api.calls();
    assert_eq!(calls[1], Call::Complete(0, STAGE_DURATION));
    assert_eq!(calls[2], Call::Finish(STAGE_DURATION));
}

#[tokio::test(start_paused = true)]
async fn polls_until_the_next_stage_is_ready() {
    let api = ScriptedApi::default();
    {
        let mut script = api.script.borrow_mut();
        script.details.push_back(Ok(detail(puzzle(1, 1), 2)));
        script.checks.push_back(Ok(CheckReply {
            is_correct: true,
            is_already_found: false,
            found: vec![Region {
                difference_id: None,
                x: 90.0,
                y: 90.0,
                width: 20.0,
                height: 20.0,
            }],
            found_difference_count: 1,
            total_difference_count: 1,
            current_score: 100,
            game_status: GameStatus::Playing,
        }));
        for _ in 0..2 {
            script
                .completions
                .push_back(Ok(stage_result(GameStatus::WaitingNextStage, None)));
        }
        // The second stage has nothing to find, so it completes as soon as it starts.
        script.completions.push_back(Ok(stage_result(
            GameStatus::Playing,
            Some(puzzle(2, 0)),
        )));
        script
            .completions
            .push_back(Ok(stage_result(GameStatus::Finished, None)));
        script
            .finishes
            .push_back(Ok(FinishReply { final_score: 100 }));
    }

    let (mut driver, _screens) = Driver::new(api.clone(), session_with_game(), options());
    let (tx, rx) = mpsc::channel(8);
    let (outcome, _tx) = tokio::join!(driver.run(rx), async move {
        sleep(Duration::from_millis(200)).await;
        tx.send(click(100.0, 100.0)).await.unwrap();
        tx
    });

    assert_eq!(outcome.snapshot.final_score, Some(100));
    let completes: Vec<_> = api
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Complete(stage, play_time) => Some((stage, play_time)),
            _ => None,
        })
        .collect();
    assert_eq!(completes.len(), 5);
    assert!(!completes[0].1.is_zero());
    assert_eq!(completes[1], (0, Duration::ZERO));
    assert_eq!(completes[2], (0, Duration::ZERO));
    assert_eq!(completes[3], (0, Duration::ZERO));
    assert_eq!(completes[4], (1, Duration::ZERO));
}

#[tokio::test(start_paused = true)]
async fn leaving_mid_game_forgets_the_game() {
    let api = ScriptedApi::default();
    api.script
        .borrow_mut()
        .details
        .push_back(Ok(detail(puzzle(1, 3), 1)));

    let keep_running = DriverOptions {
        stop_on_game_over: false,
        ..options()
    };
    let (mut driver, _screens) = Driver::new(api.clone(), session_with_game(), keep_running);
    let (tx, rx) = mpsc::channel(8);
    let (outcome, _tx) = tokio::join!(driver.run(rx), async move {
        sleep(Duration::from_millis(300)).await;
        tx.send(Intent::RequestExit).await.unwrap();
        tx.send(Intent::ConfirmExit).await.unwrap();
        tx
    });

    assert_eq!(outcome.screen, Screen::Entry);
    assert_eq!(driver.session().game_id(), None);
    assert!(driver.session().session_id().is_some());
    assert_eq!(api.calls(), vec![Call::Fetch(GameId::new("42"))]);
}

#[tokio::test(start_paused = true)]
async fn without_a_stored_game_it_returns_to_entry() {
    let api = ScriptedApi::default();
    let session = Session::new(MemoryStore::new());
    let (mut driver, _screens) = Driver::new(api.clone(), session, options());
    let (_tx, rx) = mpsc::channel::<Intent>(8);

    let outcome = driver.run(rx).await;
    assert_eq!(outcome.screen, Screen::Entry);
    assert!(api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn closed_input_stops_the_loop() {
    let api = ScriptedApi::default();
    api.script
        .borrow_mut()
        .details
        .push_back(Ok(detail(puzzle(1, 3), 1)));
    let (mut driver, _screens) = Driver::new(api.clone(), session_with_game(), options());
    let (tx, rx) = mpsc::channel::<Intent>(8);
    drop(tx);

    let outcome = driver.run(rx).await;
    // The game stays stored so it can be resumed.
    assert!(outcome.snapshot.phase.is_loading() || outcome.snapshot.phase.is_playing());
    assert_eq!(
        driver.into_session().game_id(),
        Some(GameId::new("42"))
    );
}
