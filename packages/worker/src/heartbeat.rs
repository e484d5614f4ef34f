//! Heartbeat actor keeping the worker's liveness timestamp fresh.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::Datastore;
use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tracing::{debug, warn};

use crate::error::WorkerError;

/// Messages for the heartbeat actor.
#[derive(Debug)]
pub enum HeartbeatMessage {
    /// Write the heartbeat now.
    Beat,
}

pub struct HeartbeatArgs<S> {
    pub store: Arc<S>,
    pub worker_id: String,
    pub interval: Duration,
}

pub struct HeartbeatState<S> {
    store: Arc<S>,
    worker_id: String,
    ticker: tokio::task::JoinHandle<()>,
}

impl<S: Datastore> HeartbeatState<S> {
    async fn beat(&self) {
        match self.store.set_heartbeat(&self.worker_id, Utc::now()).await {
            Ok(()) => debug!(worker = %self.worker_id, "Heartbeat"),
            Err(e) => warn!(worker = %self.worker_id, error = %e, "Failed to write heartbeat"),
        }
    }
}

/// Writes `workers:heartbeat[<id>]` on start and on every tick.
pub struct HeartbeatActor<S>(PhantomData<fn() -> S>);

impl<S> Default for HeartbeatActor<S> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<S: Datastore> Actor for HeartbeatActor<S> {
    type Msg = HeartbeatMessage;
    type State = HeartbeatState<S>;
    type Arguments = HeartbeatArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let interval = args.interval;
        let ticker = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            // The first tick completes immediately and covers the initial beat.
            loop {
                ticks.tick().await;
                if myself.send_message(HeartbeatMessage::Beat).is_err() {
                    break;
                }
            }
        });

        Ok(HeartbeatState {
            store: args.store,
            worker_id: args.worker_id,
            ticker,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            HeartbeatMessage::Beat => state.beat().await,
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.ticker.abort();
        debug!(worker = %state.worker_id, "Heartbeat stopped");
        Ok(())
    }
}

/// Handle on a running heartbeat actor.
pub struct Heartbeat {
    actor: ActorRef<HeartbeatMessage>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub async fn start<S: Datastore>(
        store: Arc<S>,
        worker_id: impl Into<String>,
        interval: Duration,
    ) -> Result<Self, WorkerError> {
        let args = HeartbeatArgs {
            store,
            worker_id: worker_id.into(),
            interval,
        };
        let (actor, handle) = Actor::spawn(None, HeartbeatActor::<S>::default(), args)
            .await
            .map_err(|e| WorkerError::Heartbeat(e.to_string()))?;
        Ok(Self { actor, handle })
    }

    /// Stop the actor and wait for it to exit.
    pub async fn stop(self) {
        self.actor.stop(None);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Heartbeat actor did not stop cleanly");
        }
    }
}
