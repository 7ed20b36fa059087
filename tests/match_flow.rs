//! End-to-end match lifecycle through the public registry API, with the
//! tokio clock paused so timing assertions are exact.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{timeout, Instant};

use ball_match_server::client::{ChannelInputSender, ClientRuntime, ClientSettings};
use ball_match_server::game::{JoinRequest, MatchHandle, MatchPhase, MatchRegistry, MatchSettings};
use ball_match_server::ids::{PlayerId, SocketId};
use ball_match_server::level::{InMemoryLevelStore, LevelDefinition, LevelObject};
use ball_match_server::ws::protocol::{ClientMsg, Role, ServerMsg};

struct Player {
    id: PlayerId,
    socket: SocketId,
    handle: MatchHandle,
    rx: UnboundedReceiver<ServerMsg>,
}

impl Player {
    async fn join(registry: &Arc<MatchRegistry>, match_id: &str, name: &str) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        let socket = SocketId::new();
        let handle = registry
            .join(
                &match_id.into(),
                JoinRequest {
                    player_id: name.into(),
                    display_name: name.to_string(),
                    role: Role::Player,
                    socket_id: socket,
                    outbound,
                },
            )
            .await
            .expect("join");
        Self {
            id: name.into(),
            socket,
            handle,
            rx,
        }
    }

    async fn send(&self, msg: ClientMsg) {
        self.handle
            .client_message(self.id.clone(), self.socket, msg)
            .await
            .expect("match alive");
    }

    async fn recv(&mut self) -> ServerMsg {
        timeout(Duration::from_secs(30), self.rx.recv())
            .await
            .expect("message before timeout")
            .expect("outbound open")
    }

    /// Receive until `stop` matches, returning everything seen including it
    async fn recv_until(&mut self, stop: impl Fn(&ServerMsg) -> bool) -> Vec<ServerMsg> {
        let mut seen = Vec::new();
        loop {
            let msg = self.recv().await;
            let done = stop(&msg);
            seen.push(msg);
            if done {
                return seen;
            }
        }
    }
}

fn meadow() -> LevelDefinition {
    LevelDefinition {
        id: "meadow".to_string(),
        name: "Meadow".to_string(),
        objects: vec![
            LevelObject::Platform {
                x: 400.0,
                y: 500.0,
                width: 800.0,
                height: 40.0,
            },
            LevelObject::Spawn { x: 100.0, y: 400.0 },
            LevelObject::Spawn { x: 160.0, y: 400.0 },
            LevelObject::Goal {
                x: 750.0,
                y: 440.0,
                radius: 30.0,
            },
        ],
    }
}

/// The spawn point sits inside the goal
fn instant_finish() -> LevelDefinition {
    LevelDefinition {
        id: "instant".to_string(),
        name: "Instant".to_string(),
        objects: vec![
            LevelObject::Platform {
                x: 0.0,
                y: 40.0,
                width: 400.0,
                height: 20.0,
            },
            LevelObject::Spawn { x: 0.0, y: 18.0 },
            LevelObject::Goal {
                x: 0.0,
                y: 18.0,
                radius: 40.0,
            },
        ],
    }
}

fn registry() -> Arc<MatchRegistry> {
    Arc::new(MatchRegistry::new(
        MatchSettings {
            min_players: 1,
            countdown_secs: 1,
        },
        Arc::new(InMemoryLevelStore::with_levels([meadow(), instant_finish()])),
    ))
}

#[tokio::test(start_paused = true)]
async fn two_players_reach_gameplay_with_fixed_tick_spacing() {
    let registry = registry();
    let mut host = Player::join(&registry, "room", "host").await;
    let mut guest = Player::join(&registry, "room", "guest").await;

    let status = host.handle.status().await.unwrap();
    assert_eq!(status.phase, MatchPhase::Waiting);
    assert_eq!(status.players.len(), 2);
    assert_eq!(status.player(&host.id).unwrap().role, Role::Creator);

    host.send(ClientMsg::UpdateLevelSelection {
        level: "meadow".to_string(),
    })
    .await;
    host.send(ClientMsg::SetReady { ready: true }).await;

    let status = host.handle.status().await.unwrap();
    assert_eq!(status.phase, MatchPhase::InProgressQueued);
    assert_eq!(status.awaiting_ack.len(), 2);

    host.send(ClientMsg::ClientReady).await;
    guest.send(ClientMsg::ClientReady).await;

    let lead_in = host
        .recv_until(|m| matches!(m, ServerMsg::StartMatch))
        .await;

    assert!(lead_in
        .iter()
        .any(|m| matches!(m, ServerMsg::LoadLevel { level_definition } if level_definition.id == "meadow")));

    let world = lead_in
        .iter()
        .find_map(|m| match m {
            ServerMsg::InitializeWorld { snapshot } => Some(snapshot.clone()),
            _ => None,
        })
        .expect("initialize_world");
    assert_eq!(world.balls.len(), 2);
    let host_ball = world.ball(&host.id).unwrap();
    let guest_ball = world.ball(&guest.id).unwrap();
    assert!(host_ball.distance_to(guest_ball) > 1.0);

    let countdown: Vec<u32> = lead_in
        .iter()
        .filter_map(|m| match m {
            ServerMsg::Countdown { seconds_left } => Some(*seconds_left),
            _ => None,
        })
        .collect();
    assert_eq!(countdown, vec![1, 0]);

    let status = host.handle.status().await.unwrap();
    assert_eq!(status.phase, MatchPhase::InProgress);

    let mut arrivals = Vec::new();
    let mut ticks = Vec::new();
    while ticks.len() < 6 {
        if let ServerMsg::Snapshot(snapshot) = host.recv().await {
            arrivals.push(Instant::now());
            ticks.push(snapshot.tick);
        }
    }

    for pair in ticks.windows(2) {
        assert!(pair[1] > pair[0]);
    }
    for pair in arrivals.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(33));
    }

    // the guest sees the same stream
    let guest_msgs = guest
        .recv_until(|m| matches!(m, ServerMsg::Snapshot(_)))
        .await;
    assert!(guest_msgs
        .iter()
        .any(|m| matches!(m, ServerMsg::StartMatch)));
}

#[tokio::test(start_paused = true)]
async fn reaching_the_score_goal_ends_the_game() {
    let registry = registry();
    let mut solo = Player::join(&registry, "room", "solo").await;

    solo.send(ClientMsg::UpdateLevelSelection {
        level: "instant".to_string(),
    })
    .await;
    solo.send(ClientMsg::UpdateScoreGoal { goal: 1 }).await;
    assert_eq!(solo.handle.status().await.unwrap().score_goal, 1);

    solo.send(ClientMsg::SetReady { ready: true }).await;
    solo.send(ClientMsg::ClientReady).await;

    let msgs = solo
        .recv_until(|m| matches!(m, ServerMsg::GameOver { .. }))
        .await;

    let finish = msgs
        .iter()
        .find_map(|m| match m {
            ServerMsg::PlayerFinished {
                player_id,
                place,
                points,
            } => Some((player_id.clone(), *place, *points)),
            _ => None,
        })
        .expect("player_finished");
    assert_eq!(finish, (solo.id.clone(), 1, 1));

    match msgs.last() {
        Some(ServerMsg::GameOver { winner_id, scores }) => {
            assert_eq!(winner_id, &solo.id);
            assert_eq!(scores.get(&solo.id), Some(&1));
        }
        other => panic!("expected game_over, got {other:?}"),
    }

    // the loop stops after game over
    let after = timeout(Duration::from_secs(1), async {
        loop {
            if let Some(ServerMsg::Snapshot(_)) = solo.rx.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(after.is_err());
}

#[tokio::test(start_paused = true)]
async fn client_runtime_follows_a_live_match() {
    let registry = registry();
    let mut host = Player::join(&registry, "room", "host").await;
    let guest = Player::join(&registry, "room", "guest").await;

    host.send(ClientMsg::UpdateLevelSelection {
        level: "meadow".to_string(),
    })
    .await;
    host.send(ClientMsg::SetReady { ready: true }).await;
    host.send(ClientMsg::ClientReady).await;
    guest.send(ClientMsg::ClientReady).await;

    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    let mut runtime = ClientRuntime::new(
        host.id.clone(),
        ChannelInputSender::new(input_tx),
        ClientSettings::default(),
    );

    let started = Instant::now();
    let mut snapshots = 0;
    while snapshots < 10 {
        let msg = host.recv().await;
        let now_ms = (Instant::now() - started).as_secs_f64() * 1000.0;
        if matches!(msg, ServerMsg::Snapshot(_)) {
            snapshots += 1;
        }
        runtime.handle_server_message(&msg, now_ms);
        runtime.frame(16.0, now_ms);

        while let Ok(input) = input_rx.try_recv() {
            host.send(input).await;
        }
    }

    let frame = runtime.frame(0.0, (Instant::now() - started).as_secs_f64() * 1000.0);
    assert!(frame.local.is_some());
    assert_eq!(frame.remotes.len(), 1);
    assert_eq!(frame.remotes[0].0, guest.id);
    assert!(runtime.tick() > 0);
    assert_eq!(runtime.prediction().last_tick(), runtime.tick());
    assert!(runtime.prediction().history_len() > 0);
}
