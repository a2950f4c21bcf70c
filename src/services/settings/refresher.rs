//! Settings refresh: fetch -> parse -> commit.
//!
//! Two phases with one hand-off between them:
//! 1. I/O phase on [`ExecutionContexts::io`]: HTTP fetch and JSON parse.
//! 2. Commit phase on [`ExecutionContexts::dispatch`]: a single
//!    `SystemAction::UpdateSettings` dispatch.
//!
//! Any failure before the hand-off leaves the store untouched. Cancellation is
//! observed up to the hand-off; once the commit is spawned it runs to
//! completion so the store never sees a half-finished refresh.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{FetchError, SettingsClient};
use crate::config::ExecutionContexts;
use crate::kernel::settings::{Settings, SettingsError};
use crate::kernel::state::{System, SystemAction};
use crate::kernel::store::{Snapshot, Store, StoreError};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Transport(FetchError),
    #[error("malformed settings payload: {0}")]
    MalformedPayload(#[from] SettingsError),
    #[error("settings commit rejected: {0}")]
    Dispatch(#[from] StoreError),
    #[error("settings refresh cancelled")]
    Cancelled,
    #[error("execution context failure: {0}")]
    Context(String),
}

impl RefreshError {
    pub fn is_transport(&self) -> bool {
        matches!(self, RefreshError::Transport(_))
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, RefreshError::MalformedPayload(_))
    }
}

#[derive(Clone)]
pub struct SettingsRefresher {
    write_key: String,
    client: Arc<dyn SettingsClient>,
    store: Store,
    contexts: ExecutionContexts,
    token: CancellationToken,
}

impl SettingsRefresher {
    pub fn new(
        write_key: impl Into<String>,
        client: Arc<dyn SettingsClient>,
        store: Store,
        contexts: ExecutionContexts,
        token: CancellationToken,
    ) -> Self {
        Self {
            write_key: write_key.into(),
            client,
            store,
            contexts,
            token,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Runs one refresh.
    ///
    /// Failures are logged here and also returned; none of them alter the
    /// committed settings.
    pub async fn refresh(&self) -> Result<Arc<Snapshot<System>>, RefreshError> {
        let outcome = match self.fetch().await {
            Ok(settings) => self.commit(settings).await,
            Err(err) => Err(err),
        };

        match &outcome {
            Ok(snapshot) => info!(
                write_key = %self.write_key,
                version = snapshot.version(),
                integrations = snapshot.settings.as_ref().map_or(0, |s| s.integrations.len()),
                "settings refreshed"
            ),
            Err(RefreshError::Cancelled) => {
                debug!(write_key = %self.write_key, "settings refresh cancelled")
            }
            Err(err) => warn!(
                write_key = %self.write_key,
                error = %err,
                "settings refresh failed, keeping previous settings"
            ),
        }
        outcome
    }

    /// I/O phase.
    async fn fetch(&self) -> Result<Settings, RefreshError> {
        let client = Arc::clone(&self.client);
        let write_key = self.write_key.clone();

        let mut io: JoinHandle<Result<Settings, RefreshError>> = self.contexts.io.spawn(async move {
            let response = client
                .settings(&write_key)
                .await
                .map_err(RefreshError::Transport)?;
            if !response.is_success() {
                return Err(RefreshError::Transport(FetchError::Status(response.status)));
            }
            Ok(Settings::parse(&response.body)?)
        });

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                io.abort();
                Err(RefreshError::Cancelled)
            }
            joined = &mut io => joined.map_err(|e| RefreshError::Context(e.to_string()))?,
        }
    }

    /// Commit phase: the hand-off point.
    async fn commit(&self, settings: Settings) -> Result<Arc<Snapshot<System>>, RefreshError> {
        if self.token.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }

        let store = self.store.clone();
        let commit = self
            .contexts
            .dispatch
            .spawn(async move { store.dispatch::<System>(SystemAction::UpdateSettings(settings)) });

        Ok(commit
            .await
            .map_err(|e| RefreshError::Context(e.to_string()))??)
    }

    /// Refreshes every `period` on the I/O context until the token is cancelled.
    /// The first refresh happens one full period after spawning.
    pub fn spawn_periodic(&self, period: Duration) -> JoinHandle<()> {
        let refresher = self.clone();
        self.contexts.io.spawn(async move {
            let mut cadence = interval(period);
            cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);
            cadence.tick().await; // Completes immediately

            loop {
                tokio::select! {
                    _ = refresher.token.cancelled() => break,
                    _ = cadence.tick() => {
                        let _ = refresher.refresh().await;
                    }
                }
            }
            debug!(write_key = %refresher.write_key, "periodic settings refresh stopped");
        })
    }
}
