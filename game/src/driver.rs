//! Async shell around `StageRuntime`.
//!
//! One cooperative event loop: ticks, player intents and request replies are fed to the
//! runtime one at a time, and the effects it returns are carried out here. Requests run as
//! local tasks whose replies come back through a channel, so runtime state is only ever
//! touched from the loop itself.

use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use engine::clock::{Clock, Millis};
use engine::kv::KeyValueStore;
use tokio::sync::{mpsc, watch};
use tokio::task::LocalSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

use crate::api::GameApi;
use crate::config::DEFAULT_TICK;
use crate::model::ImageSide;
use crate::runtime::{Destination, Effect, Event, Intent, RuntimeSnapshot, StageRuntime};
use crate::session::Session;
use crate::view::{self, Screen};

/// Clock on tokio's timeline, so paused-time tests drive the runtime too.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Millis {
        Millis(u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    pub tick: Duration,
    /// Report each new puzzle's images as loaded at their puzzle size and displayed 1:1.
    /// Used by frontends that never load the actual images.
    pub assume_images_loaded: bool,
    pub stop_on_game_over: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            assume_images_loaded: false,
            stop_on_game_over: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriveOutcome {
    pub snapshot: RuntimeSnapshot,
    pub screen: Screen,
}

pub struct Driver<A, S> {
    runtime: StageRuntime,
    api: Rc<A>,
    session: Session<S>,
    clock: TokioClock,
    options: DriverOptions,
    screen_tx: watch::Sender<Screen>,
    replies_tx: mpsc::UnboundedSender<Event>,
    replies_rx: mpsc::UnboundedReceiver<Event>,
    laid_out: Option<(u32, Option<u64>)>,
    done: bool,
}

impl<A, S> Driver<A, S>
where
    A: GameApi + 'static,
    S: KeyValueStore,
{
    pub fn new(
        api: A,
        session: Session<S>,
        options: DriverOptions,
    ) -> (Self, watch::Receiver<Screen>) {
        let (screen_tx, screen_rx) = watch::channel(Screen::Loading { notice: None });
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let driver = Self {
            runtime: StageRuntime::new(),
            api: Rc::new(api),
            session,
            clock: TokioClock::new(),
            options,
            screen_tx,
            replies_tx,
            replies_rx,
            laid_out: None,
            done: false,
        };
        (driver, screen_rx)
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    pub fn into_session(self) -> Session<S> {
        self.session
    }

    /// Plays the stored game until the player navigates away, the game ends (when
    /// `stop_on_game_over` is set) or `intents` closes. Requests still in flight at that
    /// point are dropped.
    pub async fn run(&mut self, intents: mpsc::Receiver<Intent>) -> DriveOutcome {
        let local = LocalSet::new();
        local.run_until(self.event_loop(intents)).await;

        let snapshot = self.runtime.snapshot();
        DriveOutcome {
            screen: view::project(&snapshot),
            snapshot,
        }
    }

    async fn event_loop(&mut self, mut intents: mpsc::Receiver<Intent>) {
        let game_id = self.session.game_id();
        self.dispatch(Event::Boot { game_id });

        let period = self.options.tick;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.done {
            tokio::select! {
                Some(event) = self.replies_rx.recv() => self.dispatch(event),
                intent = intents.recv() => match intent {
                    Some(intent) => self.dispatch(Event::Intent(intent)),
                    None => {
                        debug!("intent channel closed");
                        break;
                    }
                },
                _ = ticker.tick() => self.dispatch(Event::Tick),
            }
        }
    }

    fn dispatch(&mut self, event: Event) {
        let effects = self.runtime.handle(self.clock.now(), event);
        self.execute_all(effects);

        if self.options.assume_images_loaded {
            self.assume_layout();
        }
        if self.options.stop_on_game_over && self.runtime.phase().is_game_over() {
            self.done = true;
        }
        self.publish();
    }

    fn assume_layout(&mut self) {
        let snapshot = self.runtime.snapshot();
        if !snapshot.phase.is_playing() {
            return;
        }
        let Some(puzzle) = snapshot.puzzle else {
            return;
        };
        let key = (snapshot.stage_index, puzzle.puzzle_id);
        if self.laid_out == Some(key) {
            return;
        }
        self.laid_out = Some(key);

        let size = puzzle.size();
        for side in ImageSide::ALL {
            for intent in [
                Intent::ImageLoaded {
                    side,
                    intrinsic: size,
                },
                Intent::Resize { side, bounds: size },
            ] {
                let effects = self.runtime.handle(self.clock.now(), Event::Intent(intent));
                self.execute_all(effects);
            }
        }
    }

    fn publish(&self) {
        let screen = view::project(&self.runtime.snapshot());
        self.screen_tx.send_if_modified(|current| {
            if *current == screen {
                return false;
            }
            *current = screen;
            true
        });
    }

    fn execute_all(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        debug!(?effect, "effect");
        let api = Rc::clone(&self.api);
        match effect {
            Effect::FetchGame { ticket, game_id } => self.spawn(async move {
                Event::GameLoaded {
                    ticket,
                    result: api.fetch_game(&game_id).await,
                }
            }),
            Effect::SubmitCheck {
                ticket,
                game_id,
                stage,
                point,
            } => self.spawn(async move {
                Event::CheckReplied {
                    ticket,
                    point,
                    result: api.check(&game_id, stage, point).await,
                }
            }),
            Effect::CompleteStage {
                ticket,
                game_id,
                stage,
                play_time,
            } => self.spawn(async move {
                Event::CompletionReplied {
                    ticket,
                    result: api.complete_stage(&game_id, stage, play_time).await,
                }
            }),
            Effect::FinishGame {
                ticket,
                game_id,
                play_time,
            } => self.spawn(async move {
                Event::FinishReplied {
                    ticket,
                    result: api.finish(&game_id, play_time).await,
                }
            }),
            Effect::ClearGameId => {
                if let Err(err) = self.session.clear_game_id() {
                    error!(%err, "failed to clear stored game id");
                }
            }
            Effect::Navigate(Destination::Entry) => self.done = true,
        }
    }

    fn spawn<F>(&self, request: F)
    where
        F: Future<Output = Event> + 'static,
    {
        let replies = self.replies_tx.clone();
        tokio::task::spawn_local(async move {
            // The loop may already be gone; the reply is simply dropped then.
            let _ = replies.send(request.await);
        });
    }
}
