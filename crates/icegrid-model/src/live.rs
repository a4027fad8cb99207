//! Registry synchronization
//!
//! # Core Concepts
//!
//! A save is split in two halves so the registry call can run anywhere:
//! [`Application::begin_save`] picks the verb and payload and blocks further
//! saves, [`Application::complete_save`] records the outcome. While a save
//! is in flight, or while local edits are pending, updates pushed by the
//! registry are queued instead of applied; the echo of our own update or
//! sync is skipped.

use crate::application::Application;
use crate::error::{ModelResult, SyncConflict, ValidationError};
use async_trait::async_trait;
use icegrid_descriptor::{ApplicationDescriptor, ApplicationUpdateDescriptor};
use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};

/// Registry operation used to save an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryVerb {
    /// Register a new application
    Add,
    /// Replace the registry copy, restarting affected servers
    Sync,
    /// Replace the registry copy without restarting servers
    SyncWithoutRestart,
    /// Apply a delta, restarting affected servers
    Update,
    /// Apply a delta without restarting servers
    UpdateWithoutRestart,
}

impl RegistryVerb {
    /// Whether servers are restarted
    #[inline]
    #[must_use]
    pub fn restarts(self) -> bool {
        matches!(self, Self::Add | Self::Sync | Self::Update)
    }
}

impl Display for RegistryVerb {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Add => "add",
            Self::Sync => "sync",
            Self::SyncWithoutRestart => "sync without restart",
            Self::Update => "update",
            Self::UpdateWithoutRestart => "update without restart",
        };
        f.write_str(verb)
    }
}

/// Category of a registry failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Another session holds the registry lock
    AccessDenied,
    /// The registry rejected the descriptor
    Deployment,
    /// Application is unknown to the registry
    ApplicationNotExist,
    /// Application is already registered
    ApplicationExists,
    /// Registry could not be reached
    Communication,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::AccessDenied => "access denied",
            Self::Deployment => "deployment error",
            Self::ApplicationNotExist => "application does not exist",
            Self::ApplicationExists => "application already exists",
            Self::Communication => "communication failure",
        };
        f.write_str(kind)
    }
}

/// Failure reported by the registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {reason}")]
pub struct RegistryFailure {
    /// Category
    pub kind: FailureKind,
    /// Registry message
    pub reason: String,
}

impl RegistryFailure {
    /// Create failure
    #[must_use]
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// What a save sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavePayload {
    /// Complete descriptor (add or sync)
    Full(ApplicationDescriptor),
    /// Delta against the registry copy
    Update(ApplicationUpdateDescriptor),
}

/// Save prepared by [`Application::begin_save`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    /// Operation to invoke
    pub verb: RegistryVerb,
    /// Payload for the operation
    pub payload: SavePayload,
}

/// What happened to an update pushed by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryUpdateOutcome {
    /// Not tracked, or the echo of our own save
    Skipped,
    /// Queued until local changes are saved or discarded
    Deferred,
    /// Applied to the model
    Applied,
}

/// Registry collaborator
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Register a new application
    async fn add_application(&self, descriptor: &ApplicationDescriptor) -> Result<(), RegistryFailure>;

    /// Replace an application
    async fn sync_application(
        &self,
        descriptor: &ApplicationDescriptor,
        restart: bool,
    ) -> Result<(), RegistryFailure>;

    /// Apply a delta to an application
    async fn update_application(
        &self,
        update: &ApplicationUpdateDescriptor,
        restart: bool,
    ) -> Result<(), RegistryFailure>;
}

/// Synchronization state of an application
#[derive(Debug, Clone)]
pub struct LiveState {
    pub(crate) live: bool,
    pub(crate) registry_updates_enabled: bool,
    pub(crate) skip_updates: usize,
    pub(crate) concurrent_updates: VecDeque<ApplicationUpdateDescriptor>,
    pub(crate) can_use_update_descriptor: bool,
}

impl Default for LiveState {
    fn default() -> Self {
        Self {
            live: false,
            registry_updates_enabled: true,
            skip_updates: 0,
            concurrent_updates: VecDeque::new(),
            can_use_update_descriptor: true,
        }
    }
}

impl LiveState {
    /// Tracking registry updates
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// A save is waiting for its outcome
    #[inline]
    #[must_use]
    pub fn save_in_flight(&self) -> bool {
        !self.registry_updates_enabled
    }

    /// Registry updates still to be skipped as echoes
    #[inline]
    #[must_use]
    pub fn pending_echoes(&self) -> usize {
        self.skip_updates
    }

    /// Registry updates queued behind local changes
    #[inline]
    #[must_use]
    pub fn queued_updates(&self) -> usize {
        self.concurrent_updates.len()
    }
}

impl Application {
    /// Synchronization state
    #[inline]
    #[must_use]
    pub fn live_state(&self) -> &LiveState {
        &self.live
    }

    /// Prepare a save
    ///
    /// New applications are added. Live applications send a delta when
    /// configured to and the tree was not replaced wholesale; otherwise the
    /// full descriptor is synced. Returns `None` when there is nothing to
    /// send.
    ///
    /// # Errors
    /// Returns `SaveInProgress` while a previous save is not completed
    pub fn begin_save(&mut self) -> ModelResult<Option<SaveRequest>> {
        if self.live.save_in_flight() {
            return Err(ValidationError::SaveInProgress.into());
        }
        let restart = self.config.restart_on_save;

        let request = if self.editable.is_new() {
            SaveRequest {
                verb: RegistryVerb::Add,
                payload: SavePayload::Full(self.descriptor()),
            }
        } else {
            let delta = self.create_update_descriptor();
            let incremental = self.live.live
                && self.config.prefer_incremental_updates
                && self.live.can_use_update_descriptor;
            match delta {
                Some(update) if incremental => SaveRequest {
                    verb: if restart {
                        RegistryVerb::Update
                    } else {
                        RegistryVerb::UpdateWithoutRestart
                    },
                    payload: SavePayload::Update(update),
                },
                None if self.live.can_use_update_descriptor => return Ok(None),
                _ => SaveRequest {
                    verb: if restart {
                        RegistryVerb::Sync
                    } else {
                        RegistryVerb::SyncWithoutRestart
                    },
                    payload: SavePayload::Full(self.descriptor()),
                },
            }
        };

        self.live.registry_updates_enabled = false;
        if self.live.live && request.verb != RegistryVerb::Add {
            self.live.skip_updates += 1;
        }
        tracing::info!(application = %self.name, verb = %request.verb, "save started");
        Ok(Some(request))
    }

    /// Record the outcome of the save started by [`Application::begin_save`]
    ///
    /// Success commits the model and drops queued registry updates, which
    /// the saved descriptor supersedes.
    ///
    /// # Errors
    /// Returns `SyncConflict` carrying the registry failure; the model keeps
    /// its pending changes
    pub fn complete_save(
        &mut self,
        verb: RegistryVerb,
        result: Result<(), RegistryFailure>,
    ) -> ModelResult<()> {
        self.live.registry_updates_enabled = true;
        match result {
            Ok(()) => {
                self.commit();
                self.live.concurrent_updates.clear();
                if verb == RegistryVerb::Add {
                    self.live.live = true;
                }
                tracing::info!(application = %self.name, %verb, "save completed");
                Ok(())
            }
            Err(failure) => {
                if self.live.live && verb != RegistryVerb::Add {
                    self.live.skip_updates = self.live.skip_updates.saturating_sub(1);
                }
                tracing::warn!(application = %self.name, %verb, error = %failure, "save failed");
                Err(SyncConflict {
                    verb,
                    application: self.name.clone(),
                    failure,
                }
                .into())
            }
        }
    }

    /// Save through `client`, returning the verb used
    ///
    /// # Errors
    /// Same as [`Application::begin_save`] and [`Application::complete_save`]
    pub async fn save_to<C>(&mut self, client: &C) -> ModelResult<Option<RegistryVerb>>
    where
        C: RegistryClient + ?Sized,
    {
        let Some(request) = self.begin_save()? else {
            return Ok(None);
        };
        let restart = request.verb.restarts();
        let result = match (&request.verb, &request.payload) {
            (RegistryVerb::Add, SavePayload::Full(descriptor)) => {
                client.add_application(descriptor).await
            }
            (_, SavePayload::Full(descriptor)) => client.sync_application(descriptor, restart).await,
            (_, SavePayload::Update(update)) => client.update_application(update, restart).await,
        };
        self.complete_save(request.verb, result)?;
        Ok(Some(request.verb))
    }

    /// Handle an update pushed by the registry
    ///
    /// # Errors
    /// Returns the failure of applying the update; the model is unchanged
    pub fn on_registry_update(
        &mut self,
        update: ApplicationUpdateDescriptor,
    ) -> ModelResult<RegistryUpdateOutcome> {
        if !self.live.live {
            return Ok(RegistryUpdateOutcome::Skipped);
        }
        if self.live.skip_updates > 0 {
            self.live.skip_updates -= 1;
            tracing::debug!(application = %self.name, "skipping echo of own save");
            return Ok(RegistryUpdateOutcome::Skipped);
        }
        if self.live.save_in_flight() || self.has_changes() {
            self.live.concurrent_updates.push_back(update);
            tracing::debug!(
                application = %self.name,
                queued = self.live.concurrent_updates.len(),
                "registry update deferred"
            );
            return Ok(RegistryUpdateOutcome::Deferred);
        }
        self.apply_update(&update)?;
        Ok(RegistryUpdateOutcome::Applied)
    }
}
