//! Periodic liveness sweep: evict silent peers, rotate the epoch, probe.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use pulse_proto::protocol::{ProbeChallenge, SERVER_PROBE};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::ServerState;

/// Run the liveness sweep until cancelled.
///
/// Each tick closes the current epoch: peers whose tag does not match it
/// are evicted, the epoch rotates, and a probe carrying the new epoch
/// goes out to every connection. The first tick fires one full
/// `interval` after startup, so freshly announced peers always see a
/// probe before they can be evicted.
pub async fn run_sweeper(state: Arc<ServerState>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(?interval, "liveness sweeper running");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = state.registry.sweep().await;
                if !report.evicted.is_empty() {
                    counter!("bus_peers_evicted_total").increment(report.evicted.len() as u64);
                    for peer in &report.evicted {
                        debug!(peer = %peer.id, warnings = peer.warning_count, "evicted unresponsive peer");
                    }
                    if state.config.list_mode {
                        state.registry.log_snapshot().await;
                    }
                }

                let identity = state.identity();
                let challenge = ProbeChallenge {
                    refresh_id: report.epoch,
                    id: identity.id,
                    port: identity.port,
                };
                state.broadcaster.broadcast(SERVER_PROBE, challenge, None).await;
            }
            () = cancel.cancelled() => {
                debug!("liveness sweeper stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::connection::PeerLink;
    use crate::registry::PeerIdentity;
    use pulse_proto::{Envelope, HandlerTable};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn make_state() -> Arc<ServerState> {
        Arc::new(ServerState::new(ServerConfig::default(), HandlerTable::new()))
    }

    fn make_peer() -> PeerIdentity {
        PeerIdentity {
            id: Uuid::new_v4(),
            refresh_tag: Uuid::new_v4(),
            host: "127.0.0.1".into(),
            port: 4000,
            warning_count: 0,
        }
    }

    async fn attach_link(state: &ServerState) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(32);
        let link = Arc::new(PeerLink::new(Uuid::new_v4(), tx));
        state.registry.attach(link).await;
        rx
    }

    #[tokio::test]
    async fn sweeper_stops_on_cancel() {
        let state = make_state();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_sweeper(
            Arc::clone(&state),
            Duration::from_secs(100),
            cancel.clone(),
        ));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_survives_until_first_interval() {
        let state = make_state();
        let _ = state.registry.register(make_peer()).await;
        let cancel = CancellationToken::new();
        let _sweeper = tokio::spawn(run_sweeper(
            Arc::clone(&state),
            Duration::from_secs(5),
            cancel.clone(),
        ));

        // No tick fires before one full interval has passed.
        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(state.registry.num_clients().await, 1);

        // Crossing the interval evicts the peer that never answered.
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(state.registry.num_clients().await, 0);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn answering_peer_survives_repeated_sweeps() {
        let state = make_state();
        let peer = make_peer();
        let _ = state.registry.register(peer.clone()).await;
        let _ = state
            .registry
            .update_refresh_tag(peer.id, state.registry.current_epoch().await)
            .await;

        let cancel = CancellationToken::new();
        let _sweeper = tokio::spawn(run_sweeper(
            Arc::clone(&state),
            Duration::from_secs(5),
            cancel.clone(),
        ));

        for _ in 0..3 {
            time::sleep(Duration::from_millis(5_100)).await;
            assert_eq!(state.registry.num_clients().await, 1);
            // Answer the rotated epoch before the next sweep.
            let epoch = state.registry.current_epoch().await;
            assert!(state.registry.update_refresh_tag(peer.id, epoch).await);
        }
        assert_eq!(state.registry.num_clients().await, 1);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn peer_that_stops_answering_is_evicted_next_sweep() {
        let state = make_state();
        let peer = make_peer();
        let _ = state.registry.register(peer.clone()).await;
        let _ = state
            .registry
            .update_refresh_tag(peer.id, state.registry.current_epoch().await)
            .await;

        let cancel = CancellationToken::new();
        let _sweeper = tokio::spawn(run_sweeper(
            Arc::clone(&state),
            Duration::from_secs(5),
            cancel.clone(),
        ));

        // Survives the sweep it answered, then goes silent.
        time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(state.registry.num_clients().await, 1);
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(state.registry.num_clients().await, 0);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn probe_carries_rotated_epoch_and_server_identity() {
        let state = make_state();
        let mut rx = attach_link(&state).await;
        let cancel = CancellationToken::new();
        let _sweeper = tokio::spawn(run_sweeper(
            Arc::clone(&state),
            Duration::from_secs(5),
            cancel.clone(),
        ));

        time::sleep(Duration::from_millis(5_100)).await;

        let raw = rx.try_recv().unwrap();
        let envelope = Envelope::decode(&raw).unwrap();
        assert_eq!(envelope.method, SERVER_PROBE);
        let challenge: ProbeChallenge = envelope.params_as().unwrap();
        assert_eq!(challenge.refresh_id, state.registry.current_epoch().await);
        assert_eq!(challenge.id, state.identity().id);
        assert_eq!(challenge.port, state.identity().port);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_sweeper_stops_evicting() {
        let state = make_state();
        let _ = state.registry.register(make_peer()).await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_sweeper(
            Arc::clone(&state),
            Duration::from_secs(5),
            cancel.clone(),
        ));

        cancel.cancel();
        handle.await.unwrap();

        // Well past the interval, the stale peer is still registered.
        time::sleep(Duration::from_secs(12)).await;
        assert_eq!(state.registry.num_clients().await, 1);
    }
}
