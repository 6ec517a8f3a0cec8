//! A small Rejoin server: every player gets an avatar object (with a
//! nameplate child) once its client is ready, and a player who drops
//! mid-session gets both back on reconnect.
//!
//! Environment:
//! - `REJOIN_ADDR` (default `0.0.0.0:8080`)
//! - `REJOIN_SHARE_IDS` (default `true`)
//! - `REJOIN_SESSION_STARTED` (default `false`; the session then starts
//!   once two players are in)
//! - `RUST_LOG` (default `info`)

use rejoin::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Players needed before the session starts on its own.
const START_AT: usize = 2;

/// Avatar ids are handed out from here upward.
const FIRST_AVATAR: ObjectId = ObjectId(1000);

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.trim(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

/// Starts the session once enough players are in, and logs avatars as the
/// spawner hands them out.
async fn run_lobby(session: SessionHandle) -> Result<(), RejoinError> {
    let mut subs = session.subscribe().await?;

    loop {
        let event = tokio::select! {
            spawned = subs.spawned.recv() => {
                match spawned {
                    Ok(spawned) => {
                        tracing::info!(slot = %spawned.slot, avatar = %spawned.object, "avatar spawned");
                    }
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return Ok(()),
                }
                continue;
            }
            event = subs.players.recv() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "lobby fell behind on player events");
                continue;
            }
            Err(RecvError::Closed) => return Ok(()),
        };

        tracing::info!(slot = %event.slot, state = %event.state, "player connection changed");

        if event.state == PlayerConnectionState::Connected {
            let online = session
                .players()
                .await?
                .iter()
                .filter(|p| p.is_connected())
                .count();
            if online >= START_AT && session.start_session().await? {
                tracing::info!(online, "session started");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("REJOIN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let config = SessionConfig {
        share_ids: env_flag("REJOIN_SHARE_IDS", true),
        session_started_initially: env_flag("REJOIN_SESSION_STARTED", false),
    };
    tracing::info!(%addr, share_ids = config.share_ids, "starting session demo");

    let server = RejoinServer::<PassthroughAuthenticator>::builder()
        .bind(&addr)
        .session_config(config)
        .player_spawner(PlayerSpawner::new(FIRST_AVATAR).with_children(1))
        .build(PassthroughAuthenticator)
        .await?;
    let session = server.session();

    let lobby = tokio::spawn(run_lobby(session.clone()));

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            session.end_session().await?;
            session.shutdown().await?;
        }
    }

    lobby.abort();
    Ok(())
}
