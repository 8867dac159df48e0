//! Mirrors the origin's follow stream into the [`ChainCache`].
//!
//! One session opens a stream from the persisted head, rolls back to a
//! resumable ancestor when the origin no longer knows that head, and then
//! applies events until the stream ends or fails. [`ChainFollower::spawn`]
//! runs sessions forever under the supervisor.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lumen_core::error::{LumenError, OriginError};
use lumen_core::traits::{EventStream, Origin};
use lumen_core::types::ChainEvent;

use crate::cache::ChainCache;
use crate::supervisor::{spawn_supervised, HealthRegistry};

/// Health registry key of the follower.
pub const COMPONENT: &str = "follower";

/// States the follower reports through the health registry.
///
/// Between sessions the supervisor records
/// [`STATE_BACKOFF`](crate::supervisor::STATE_BACKOFF) for the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerState {
    Following,
    RollingBack,
}

impl FollowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Following => "following",
            Self::RollingBack => "rolling_back",
        }
    }
}

/// Background ingestion loop. Sole writer of the cache.
pub struct ChainFollower {
    cache: Arc<ChainCache>,
    origin: Arc<dyn Origin>,
    health: Arc<HealthRegistry>,
    progress_interval: u64,
}

impl ChainFollower {
    pub fn new(
        cache: Arc<ChainCache>,
        origin: Arc<dyn Origin>,
        health: Arc<HealthRegistry>,
        progress_interval: u64,
    ) -> Self {
        Self {
            cache,
            origin,
            health,
            progress_interval: progress_interval.max(1),
        }
    }

    /// Run follow sessions forever, sleeping `retry_delay` between them.
    pub fn spawn(self: Arc<Self>, retry_delay: Duration) -> JoinHandle<()> {
        let health = self.health.clone();
        spawn_supervised(COMPONENT, health, retry_delay, move || {
            let follower = self.clone();
            async move { follower.follow_once().await }
        })
    }

    /// One follow session.
    ///
    /// Returns `Ok(())` when the origin closes the stream cleanly.
    pub async fn follow_once(&self) -> Result<(), LumenError> {
        self.set_state(FollowerState::Following);
        let head = self.cache.head()?;
        debug!(head = ?head.map(|h| h.to_string()), "opening follow stream");

        let stream = match self.origin.follow(head).await {
            Ok(stream) => stream,
            Err(OriginError::UnknownHead(reason)) => {
                warn!(%reason, "origin cannot resume from cached head, rolling back");
                self.roll_back().await?
            }
            Err(e) => return Err(e.into()),
        };

        self.set_state(FollowerState::Following);
        self.consume(stream).await
    }

    /// Apply one event to the cache.
    pub fn apply(&self, event: &ChainEvent) -> Result<(), LumenError> {
        match event {
            ChainEvent::Connected(block) => {
                self.cache.cache_block(block)?;
                if block.sequence % self.progress_interval == 0 {
                    info!(sequence = block.sequence, hash = %block.hash, "cached block");
                }
            }
            ChainEvent::Disconnected(block) => {
                self.cache.disconnect(block)?;
                info!(sequence = block.sequence, hash = %block.hash, "disconnected block");
            }
        }
        Ok(())
    }

    /// Probe cached ancestors from `head_sequence - 1` down until the origin
    /// accepts one as a resumption point, then roll the cache back to it.
    ///
    /// When none is accepted the cache is cleared, so the next session
    /// follows from genesis.
    async fn roll_back(&self) -> Result<EventStream, LumenError> {
        self.set_state(FollowerState::RollingBack);
        let head_sequence = self.cache.head_sequence()?;

        for sequence in (1..head_sequence).rev() {
            let Some(candidate) = self.cache.get_block_by_sequence(sequence)? else {
                debug!(sequence, "no cached block to probe");
                continue;
            };
            match self.origin.follow(Some(candidate.hash)).await {
                Ok(stream) => {
                    self.cache.rollback_to(&candidate)?;
                    info!(
                        sequence,
                        hash = %candidate.hash,
                        dropped = head_sequence - sequence,
                        "resumed from cached ancestor"
                    );
                    return Ok(stream);
                }
                Err(OriginError::UnknownHead(_)) => {
                    debug!(sequence, "ancestor unknown to origin");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // No cached ancestor is on the origin's chain; start over from genesis.
        self.cache.clear()?;
        Err(LumenError::DivergenceExhausted { from: head_sequence })
    }

    async fn consume(&self, mut stream: EventStream) -> Result<(), LumenError> {
        while let Some(event) = stream.next().await {
            self.apply(&event?)?;
        }
        info!(
            head_sequence = self.cache.head_sequence()?,
            "origin closed the follow stream"
        );
        Ok(())
    }

    fn set_state(&self, state: FollowerState) {
        self.health.set_state(COMPONENT, state.as_str());
    }
}
