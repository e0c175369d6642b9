//! Planning Poker Demo
//!
//! Plays one round in an in-memory room: a dealer and two players estimate
//! a single issue, votes are revealed automatically, and the hint is logged.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use poker_planning::{
    game::{EventStream, GameConfig, GameEvent},
    Game, MemoryHub, Room, State, SystemClock, VoteState, VoteValue, VERSION,
};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Planning Poker v{}", VERSION);

    demo_round().await
}

/// Demo: one issue, three voters, auto-reveal.
async fn demo_round() -> Result<()> {
    info!("=== Starting Demo Round ===");

    let config = GameConfig {
        auto_reveal: true,
        auto_reveal_delay: Duration::from_millis(500),
        ..GameConfig::from_env()
    };
    let hub = MemoryHub::new();

    let dealer = peer(&hub, &config, "dealer").await?;
    let (room, state) = dealer.create_new_room().await?;
    let token = room.to_token();
    info!("Room {} (share token {})", room.id(), token);

    let mut events = dealer.subscribe().await;
    dealer.join_room(room, Some(state)).await?;

    let mut players = Vec::new();
    for name in ["ana", "bo"] {
        let player = peer(&hub, &config, name).await?;
        player.join_room(Room::from_token(&token)?, None).await?;
        players.push(player);
    }
    wait_for(&mut events, |s| s.players.len() == 3).await?;
    info!("All players joined");

    let issue = dealer.deal("https://tracker.example/ISSUE-42").await?;
    info!("Dealt issue {}", issue);

    dealer.publish_vote(Some(VoteValue::from("5"))).await?;
    for (player, value) in players.iter().zip(["5", "8"]) {
        until_voting(player).await?;
        player.publish_vote(Some(VoteValue::from(value))).await?;
    }

    let revealed = wait_for(&mut events, |s| s.votes_revealed).await?;
    let active = revealed.active().context("no active issue after reveal")?;

    info!("=== Votes ===");
    for (id, vote) in &active.votes {
        let name = revealed.player(id).map_or("?", |p| p.name.as_str());
        let value = vote.value.as_ref().map_or("-", |v| v.as_str());
        info!("{}: {}", name, value);
    }

    let hint = active.hint.clone().context("no hint after reveal")?;
    info!(
        "Hint: {} - {} (acceptable: {})",
        hint.value.as_ref().map_or("none", |v| v.as_str()),
        hint.advice,
        hint.acceptable
    );

    let result = hint.value.unwrap_or_else(|| VoteValue::from("?"));
    dealer.finish(result.clone()).await?;
    info!("Issue finished with {}", result);

    for player in &players {
        player.stop().await;
    }
    dealer.stop().await;
    info!("=== Demo Round Complete ===");
    Ok(())
}

async fn peer(hub: &MemoryHub, config: &GameConfig, name: &str) -> Result<Game> {
    let game = Game::builder()
        .config(config.clone())
        .transport(Arc::new(hub.connect()))
        .clock(Arc::new(SystemClock))
        .build()?;
    game.initialize().await?;
    game.rename(name).await?;
    Ok(game)
}

/// Next snapshot satisfying `pred`, logging timer events on the way.
async fn wait_for(events: &mut EventStream, pred: impl Fn(&State) -> bool) -> Result<Arc<State>> {
    tokio::time::timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            match event {
                GameEvent::StateChanged(state) if pred(&state) => return Ok(state),
                GameEvent::AutoRevealScheduled { delay } => info!("Auto-reveal in {:?}", delay),
                GameEvent::AutoRevealCancelled => info!("Auto-reveal cancelled"),
                _ => {}
            }
        }
        bail!("event stream closed")
    })
    .await
    .context("timed out waiting for state")?
}

/// Players vote once the dealer's snapshot for the new issue reached them.
async fn until_voting(game: &Game) -> Result<()> {
    tokio::time::timeout(WAIT, async {
        while game.vote_state().await != VoteState::Voting {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("player never saw the dealt issue")
}
