use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use engine::kv::JsonFileStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use spotdiff::api::{CreateGameRequest, GameApi};
use spotdiff::config::ClientConfig;
use spotdiff::driver::{Driver, DriverOptions};
use spotdiff::http::HttpGameApi;
use spotdiff::logging;
use spotdiff::runtime::Intent;
use spotdiff::session::Session;
use spotdiff::view::{parse_intent, render_text};

const HELP: &str = "\
commands:
  click <original|modified> <x> <y>   click inside the image box
  resize <side> <width> <height>      image box size
  load <side> <width> <height>        loaded image size
  exit | yes | no                     leave the game (confirm / cancel)
  retry                               resend a failed request
  back                                return from the result screen";

#[derive(Debug, Parser)]
#[command(name = "spotdiff")]
#[command(about = "Terminal client for the spot-the-difference game")]
struct Cli {
    /// API root, e.g. http://127.0.0.1:8000/api/v1
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// Where the session and current game id are kept.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a game and remember it as the current one.
    New {
        #[arg(long, default_value_t = 3)]
        slots: u32,
        /// Start playing right away.
        #[arg(long, default_value_t = false)]
        play: bool,
    },
    /// Play the current game, reading commands from stdin.
    Play,
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Debug, Subcommand)]
enum SessionAction {
    Show,
    Reset,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let mut config = ClientConfig::from_env();
    if let Some(api_base) = cli.api_base {
        config.api_base = api_base;
    }
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    config.validate()?;

    let mut session = Session::new(JsonFileStore::open(&config.store_path));
    session
        .ensure_session_id()
        .context("failed to persist session id")?;

    match cli.command {
        Commands::Session { action } => cmd_session(&mut session, action),
        Commands::New { slots, play } => {
            let runtime = async_runtime()?;
            let result = runtime.block_on(async {
                cmd_new(&config, &mut session, slots).await?;
                if play {
                    cmd_play(&config, session).await?;
                }
                Ok::<(), anyhow::Error>(())
            });
            // Stdin reads block a worker thread that would otherwise hold up shutdown.
            runtime.shutdown_timeout(Duration::from_millis(100));
            result
        }
        Commands::Play => {
            let runtime = async_runtime()?;
            let result = runtime.block_on(cmd_play(&config, session));
            runtime.shutdown_timeout(Duration::from_millis(100));
            result
        }
    }
}

fn async_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn cmd_session(session: &mut Session<JsonFileStore>, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::Show => {
            println!("store: {}", session.store().path().display());
            println!(
                "sessionId: {}",
                session.session_id().unwrap_or_else(|| "-".to_string())
            );
            println!(
                "currentGameRoomId: {}",
                session
                    .game_id()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        SessionAction::Reset => {
            session.reset().context("failed to reset session")?;
            println!("session cleared");
        }
    }
    Ok(())
}

async fn cmd_new(
    config: &ClientConfig,
    session: &mut Session<JsonFileStore>,
    slots: u32,
) -> Result<()> {
    let api = HttpGameApi::new(config.api_base.clone(), config.request_timeout);
    let reply = api
        .create_game(&CreateGameRequest::single(slots))
        .await
        .with_context(|| format!("failed to create game at {}", config.api_base))?;
    session
        .set_game_id(&reply.game_id)
        .context("failed to store game id")?;
    println!(
        "created game {} ({} upload slots)",
        reply.game_id,
        reply.upload_slots.len()
    );
    Ok(())
}

async fn cmd_play(config: &ClientConfig, session: Session<JsonFileStore>) -> Result<()> {
    if session.game_id().is_none() {
        bail!("no game in progress; run `spotdiff new` first");
    }

    let api = HttpGameApi::new(config.api_base.clone(), config.request_timeout);
    let options = DriverOptions {
        tick: config.tick,
        assume_images_loaded: true,
        stop_on_game_over: false,
    };
    let (mut driver, mut screens) = Driver::new(api, session, options);

    println!("{HELP}");
    let (intent_tx, intent_rx) = mpsc::channel(16);
    let input = tokio::spawn(read_intents(intent_tx));
    let render = tokio::spawn(async move {
        while screens.changed().await.is_ok() {
            let text = render_text(&screens.borrow_and_update());
            println!("\n{text}");
        }
    });

    let outcome = driver.run(intent_rx).await;
    render.abort();
    input.abort();

    println!("\n{}", render_text(&outcome.screen));
    Ok(())
}

async fn read_intents(intents: mpsc::Sender<Intent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match parse_intent(&line) {
            Ok(intent) => {
                if intents.send(intent).await.is_err() {
                    break;
                }
            }
            Err(err) => eprintln!("{err}"),
        }
    }
}
