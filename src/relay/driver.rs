//! Relay loop driver
//!
//! One cooperative relay task per tracked source chain. Each tick
//! redispatches due retries, polls the source gateway for new events,
//! correlates and dispatches them in observation order, and advances the
//! chain's cursor past everything that reached at least Submitted.
//!
//! The driver is the only component that decides between retry and
//! terminal failure; adapters only classify. Every terminal failure lands
//! in an observable failed list in addition to the error log.

use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{RelayConfig, TokenConfig};
use crate::error::{ChainError, ErrorKind};
use crate::registry::RelayerRegistry;
use crate::relay::correlate::correlate;
use crate::relay::generic::{
    unix_now_ms, ConfirmationStatus, Cursor, EnvelopeStatus, RelayEnvelope,
};

/// Ceiling for the exponential retry delay.
const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// Jitter fraction added on top of the exponential delay.
const JITTER_FACTOR: f64 = 0.1;

// ============================================================================
// SHARED RELAY STATE
// ============================================================================

/// State shared between the relay tasks and the observability API.
///
/// Each map is keyed by source chain and written only by the task driving
/// that chain; the API takes read snapshots.
#[derive(Default)]
pub struct RelayState {
    cursors: RwLock<HashMap<String, Cursor>>,
    pending: RwLock<HashMap<String, VecDeque<RelayEnvelope>>>,
    failed: RwLock<Vec<RelayEnvelope>>,
    poll_failures: RwLock<HashMap<String, u32>>,
    /// Command ids already tracked this run, so re-polled blocks (the
    /// cursor holds below still-pending envelopes) do not duplicate work
    seen: RwLock<HashSet<String>>,
}

impl RelayState {
    /// Snapshot of every tracked cursor, sorted by chain name.
    pub async fn cursors(&self) -> Vec<Cursor> {
        let cursors = self.cursors.read().await;
        let mut snapshot: Vec<Cursor> = cursors.values().cloned().collect();
        snapshot.sort_by(|a, b| a.chain.cmp(&b.chain));
        snapshot
    }

    /// Cursor for one chain, if the chain has been ticked.
    pub async fn cursor(&self, chain: &str) -> Option<Cursor> {
        self.cursors.read().await.get(chain).cloned()
    }

    /// Snapshot of all envelopes waiting for a retry.
    pub async fn pending_envelopes(&self) -> Vec<RelayEnvelope> {
        let pending = self.pending.read().await;
        pending.values().flatten().cloned().collect()
    }

    /// Snapshot of all terminally failed envelopes.
    pub async fn failed_envelopes(&self) -> Vec<RelayEnvelope> {
        self.failed.read().await.clone()
    }
}

/// Per-call counters returned by `RelayLoop::relay`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RelaySummary {
    /// Events returned by source polls this pass
    pub events_observed: usize,
    /// Envelopes accepted by a destination chain
    pub submitted: usize,
    /// Envelopes confirmed (including idempotent duplicates)
    pub confirmed: usize,
    /// Envelopes that failed terminally
    pub failed: usize,
    /// Envelopes left pending for a later tick
    pub deferred: usize,
}

impl RelaySummary {
    fn merge(&mut self, other: RelaySummary) {
        self.events_observed += other.events_observed;
        self.submitted += other.submitted;
        self.confirmed += other.confirmed;
        self.failed += other.failed;
        self.deferred += other.deferred;
    }
}

// ============================================================================
// RELAY LOOP
// ============================================================================

/// Top-level relay driver.
///
/// Constructed with an explicit registry (no process-wide globals); late
/// `set_relayer` calls on that registry take effect on the next tick.
pub struct RelayLoop {
    registry: RelayerRegistry,
    config: RelayConfig,
    allowed_tokens: HashSet<String>,
    state: Arc<RelayState>,
    shutdown: watch::Receiver<bool>,
}

impl RelayLoop {
    /// Creates a relay loop over the given registry and configuration.
    ///
    /// # Arguments
    ///
    /// * `registry` - Chain handler registry, injected by the caller
    /// * `config` - Relay timing, retry, and tracked-chain settings
    /// * `tokens` - Token allowlist; empty means no token restriction
    /// * `shutdown` - Watch channel flipped to `true` to stop `run`
    pub fn new(
        registry: RelayerRegistry,
        mut config: RelayConfig,
        tokens: &[TokenConfig],
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        // Chain names key the cursor and retry maps; normalize once so
        // config casing cannot split a chain's state
        config.source_chains = config
            .source_chains
            .iter()
            .map(|chain| chain.to_lowercase())
            .collect();
        let allowed_tokens = tokens
            .iter()
            .map(|token| token.symbol.to_lowercase())
            .collect();
        Self {
            registry,
            config,
            allowed_tokens,
            state: Arc::new(RelayState::default()),
            shutdown,
        }
    }

    /// Shared state handle for the observability API.
    pub fn state(&self) -> Arc<RelayState> {
        Arc::clone(&self.state)
    }

    /// The registry this loop routes through.
    pub fn registry(&self) -> &RelayerRegistry {
        &self.registry
    }

    /// Restores a chain's cursor from a persisted watermark.
    ///
    /// Regressions are ignored, keeping the no-regression invariant even
    /// against a stale store.
    pub async fn restore_cursor(&self, chain: &str, height: u64) {
        let mut cursors = self.state.cursors.write().await;
        cursors
            .entry(chain.to_lowercase())
            .or_insert_with(|| Cursor::new(chain.to_lowercase(), 0))
            .advance_to(height);
    }

    /// Runs one bounded relay pass over every tracked source chain.
    ///
    /// This is the single entry point the scheduled loop repeats; tests
    /// call it directly for bounded iterations.
    pub async fn relay(&self) -> RelaySummary {
        let mut total = RelaySummary::default();
        for chain in &self.config.source_chains {
            if self.shutdown_requested() {
                break;
            }
            total.merge(self.tick_chain(chain).await);
        }
        total
    }

    /// Runs the relay until the shutdown signal flips.
    ///
    /// One independent task per tracked source chain, each sleeping
    /// `poll_interval_ms` between ticks. An in-flight envelope is always
    /// finished before a task honors the signal.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            "Starting relay loop for source chains: {}",
            self.config.source_chains.join(", ")
        );

        let mut handles = Vec::with_capacity(self.config.source_chains.len());
        for chain in self.config.source_chains.clone() {
            let driver = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                driver.run_direction(&chain).await;
            }));
        }

        for result in futures::future::join_all(handles).await {
            result?;
        }

        info!("Relay loop stopped");
        Ok(())
    }

    async fn run_direction(&self, chain: &str) {
        info!("Tracking source chain {}", chain);
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick_chain(chain).await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Stopped tracking source chain {}", chain);
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn token_allowed(&self, symbol: &str) -> bool {
        self.allowed_tokens.is_empty() || self.allowed_tokens.contains(&symbol.to_lowercase())
    }

    async fn cursor_for(&self, chain: &str) -> Cursor {
        let mut cursors = self.state.cursors.write().await;
        cursors
            .entry(chain.to_string())
            .or_insert_with(|| Cursor::new(chain, 0))
            .clone()
    }

    /// One tick for one source chain: retries, poll, dispatch, cursor.
    async fn tick_chain(&self, chain: &str) -> RelaySummary {
        let mut stats = RelaySummary::default();

        let Some(adapter) = self.registry.get_relayer(chain).await else {
            warn!("No relayer registered for source chain {}, skipping tick", chain);
            return stats;
        };

        // Redispatch due retries first; they are older than anything the
        // poll below can return.
        let mut survivors: VecDeque<RelayEnvelope> = VecDeque::new();
        let mut queue = {
            let mut pending = self.state.pending.write().await;
            pending.remove(chain).unwrap_or_default()
        };
        let now_ms = unix_now_ms();
        while let Some(mut envelope) = queue.pop_front() {
            if self.shutdown_requested() || !envelope.is_due(now_ms) {
                survivors.push_back(envelope);
                continue;
            }
            self.dispatch(&mut envelope, &mut stats).await;
            self.route_after_dispatch(envelope, &mut survivors, &mut stats).await;
        }

        if !self.shutdown_requested() {
            let cursor = self.cursor_for(chain).await;
            match adapter.poll_events(&cursor).await {
                Ok(outcome) => {
                    self.state.poll_failures.write().await.remove(chain);
                    stats.events_observed += outcome.events.len();
                    self.process_events(outcome.events, &mut survivors, &mut stats)
                        .await;
                    self.advance_cursor(chain, outcome.scanned_to, &survivors).await;
                }
                Err(err) => self.note_poll_failure(chain, err, &mut stats).await,
            }
        }

        if !survivors.is_empty() {
            let mut pending = self.state.pending.write().await;
            pending.insert(chain.to_string(), survivors);
        }

        stats
    }

    /// Correlates and dispatches freshly polled events in observed order.
    async fn process_events(
        &self,
        events: Vec<crate::relay::generic::ChainEvent>,
        survivors: &mut VecDeque<RelayEnvelope>,
        stats: &mut RelaySummary,
    ) {
        for event in events {
            let id = event.command_id();
            {
                let mut seen = self.state.seen.write().await;
                if !seen.insert(id) {
                    continue;
                }
            }

            let mut envelope = correlate(&self.registry, event).await;
            if envelope.status == EnvelopeStatus::Failed {
                error!(
                    "No relayer registered for destination chain {}, failing command {}",
                    envelope.event.destination_chain, envelope.command_id
                );
                stats.failed += 1;
                self.state.failed.write().await.push(envelope);
                continue;
            }

            if let Some(token) = &envelope.event.token {
                if !self.token_allowed(&token.symbol) {
                    error!(
                        "Token {} is not in the configured allowlist, failing command {}",
                        token.symbol, envelope.command_id
                    );
                    envelope.last_error = Some(ErrorKind::Permanent);
                    envelope.advance_status(EnvelopeStatus::Failed);
                    stats.failed += 1;
                    self.state.failed.write().await.push(envelope);
                    continue;
                }
            }

            if self.shutdown_requested() {
                // Not dispatched; the cursor stays below this event and a
                // later tick picks it up again.
                stats.deferred += 1;
                survivors.push_back(envelope);
                continue;
            }

            self.dispatch(&mut envelope, stats).await;
            self.route_after_dispatch(envelope, survivors, stats).await;
        }
    }

    /// Submits an envelope to its destination chain and awaits
    /// confirmation. Mutates status, attempts, and the retry gate.
    async fn dispatch(&self, envelope: &mut RelayEnvelope, stats: &mut RelaySummary) {
        envelope.attempts += 1;

        let Some(destination) = self
            .registry
            .get_relayer(&envelope.event.destination_chain)
            .await
        else {
            // Registration disappeared between correlation and dispatch
            error!(
                "No relayer registered for destination chain {}, failing command {}",
                envelope.event.destination_chain, envelope.command_id
            );
            envelope.last_error = Some(ErrorKind::UnroutableDestination);
            envelope.advance_status(EnvelopeStatus::Failed);
            return;
        };

        let receipt = match destination.submit(envelope).await {
            Ok(receipt) => receipt,
            Err(ChainError::SubmissionConflict(command_id)) => {
                info!(
                    "Command {} already executed on {}, recording as confirmed",
                    command_id, envelope.event.destination_chain
                );
                envelope.last_error = Some(ErrorKind::SubmissionConflict);
                envelope.advance_status(EnvelopeStatus::Confirmed);
                stats.confirmed += 1;
                return;
            }
            Err(err @ ChainError::Transient(_)) => {
                self.note_retryable(envelope, &err);
                return;
            }
            Err(ChainError::Permanent(message)) => {
                error!(
                    "Permanent failure submitting command {}: {}",
                    envelope.command_id, message
                );
                envelope.last_error = Some(ErrorKind::Permanent);
                envelope.advance_status(EnvelopeStatus::Failed);
                return;
            }
        };

        envelope.advance_status(EnvelopeStatus::Submitted);
        stats.submitted += 1;

        let timeout = Duration::from_millis(self.config.confirmation_timeout_ms);
        match destination.await_confirmation(&receipt.tx_hash, timeout).await {
            Ok(ConfirmationStatus::Confirmed) => {
                info!(
                    "Command {} confirmed on {} (tx {})",
                    envelope.command_id, envelope.event.destination_chain, receipt.tx_hash
                );
                envelope.last_error = None;
                envelope.advance_status(EnvelopeStatus::Confirmed);
                stats.confirmed += 1;
            }
            Ok(ConfirmationStatus::Failed) => {
                error!(
                    "Command {} execution failed on {} (tx {})",
                    envelope.command_id, envelope.event.destination_chain, receipt.tx_hash
                );
                envelope.last_error = Some(ErrorKind::Permanent);
                envelope.advance_status(EnvelopeStatus::Failed);
            }
            Err(err) if err.is_retryable() => self.note_retryable(envelope, &err),
            Err(err) => {
                error!(
                    "Permanent failure confirming command {}: {}",
                    envelope.command_id, err
                );
                envelope.last_error = Some(ErrorKind::Permanent);
                envelope.advance_status(EnvelopeStatus::Failed);
            }
        }
    }

    /// Records a retryable dispatch failure: backoff below the ceiling,
    /// terminal failure at it.
    fn note_retryable(&self, envelope: &mut RelayEnvelope, err: &ChainError) {
        envelope.last_error = Some(ErrorKind::Transient);

        if envelope.attempts >= self.config.max_attempts {
            error!(
                "Giving up on command {} after {} attempts: {}",
                envelope.command_id, envelope.attempts, err
            );
            envelope.advance_status(EnvelopeStatus::Failed);
        } else {
            let delay = self.retry_delay(envelope.attempts);
            envelope.not_before = unix_now_ms() + delay.as_millis() as u64;
            warn!(
                "Retryable failure for command {} (attempt {}/{}), backing off {:?}: {}",
                envelope.command_id, envelope.attempts, self.config.max_attempts, delay, err
            );
        }
    }

    /// Exponential backoff with cap and jitter.
    fn retry_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let base = self.config.retry_backoff_ms.max(1);
        let delay_ms = base
            .saturating_mul(1u64 << exponent)
            .min(MAX_RETRY_DELAY_MS);
        let jitter = (delay_ms as f64 * rand::thread_rng().gen_range(0.0..JITTER_FACTOR)) as u64;
        Duration::from_millis(delay_ms + jitter)
    }

    /// Routes a dispatched envelope: drop confirmed, surface failed, and
    /// queue everything still in flight.
    async fn route_after_dispatch(
        &self,
        envelope: RelayEnvelope,
        survivors: &mut VecDeque<RelayEnvelope>,
        stats: &mut RelaySummary,
    ) {
        match envelope.status {
            EnvelopeStatus::Confirmed => {}
            EnvelopeStatus::Failed => {
                stats.failed += 1;
                self.state.failed.write().await.push(envelope);
            }
            EnvelopeStatus::Pending | EnvelopeStatus::Submitted => {
                stats.deferred += 1;
                survivors.push_back(envelope);
            }
        }
    }

    /// Advances the cursor to one past the scanned height, bounded by the
    /// lowest height still pending submission.
    async fn advance_cursor(
        &self,
        chain: &str,
        scanned_to: u64,
        survivors: &VecDeque<RelayEnvelope>,
    ) {
        let pending_floor = survivors
            .iter()
            .filter(|envelope| !envelope.status.releases_cursor())
            .map(|envelope| envelope.event.block_height)
            .min();

        let candidate = scanned_to.saturating_add(1);
        let target = match pending_floor {
            Some(height) => candidate.min(height),
            None => candidate,
        };

        let mut cursors = self.state.cursors.write().await;
        let cursor = cursors
            .entry(chain.to_string())
            .or_insert_with(|| Cursor::new(chain, 0));
        if cursor.advance_to(target) {
            debug!("Cursor for {} advanced to {}", chain, cursor.height);
        }
    }

    /// Classifies a poll failure; persistent transient failures and any
    /// permanent failure surface a synthetic Failed envelope.
    async fn note_poll_failure(&self, chain: &str, err: ChainError, stats: &mut RelaySummary) {
        match err {
            ChainError::Transient(message) => {
                let attempts = {
                    let mut failures = self.state.poll_failures.write().await;
                    let counter = failures.entry(chain.to_string()).or_insert(0);
                    *counter += 1;
                    *counter
                };

                if attempts >= self.config.max_attempts {
                    error!(
                        "Polling {} failed {} consecutive times, surfacing for operator attention: {}",
                        chain, attempts, message
                    );
                    let height = self.cursor_for(chain).await.height;
                    let envelope =
                        RelayEnvelope::poll_failure(chain, height, attempts, ErrorKind::Transient);
                    stats.failed += 1;
                    self.state.failed.write().await.push(envelope);
                    self.state.poll_failures.write().await.remove(chain);
                } else {
                    warn!(
                        "Polling {} failed (attempt {}/{}): {}",
                        chain, attempts, self.config.max_attempts, message
                    );
                }
            }
            ChainError::Permanent(message) => {
                error!("Polling {} returned malformed data: {}", chain, message);
                let height = self.cursor_for(chain).await.height;
                let envelope = RelayEnvelope::poll_failure(chain, height, 1, ErrorKind::Permanent);
                stats.failed += 1;
                self.state.failed.write().await.push(envelope);
            }
            // Polling never raises a submission conflict
            ChainError::SubmissionConflict(_) => {}
        }
    }
}
