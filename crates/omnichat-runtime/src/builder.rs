//! SDK Builder API
//!
//! Assembles a [`ChatSdk`] from a storage collaborator and optional
//! configuration, validates the configuration, and restores the persisted
//! event queue before handing the SDK out.

use crate::logging::init_console_logging;
use crate::sdk::ChatSdk;
use omnichat_core::{
    CredentialStore, EventStore, LogLevel, SdkConfig, SdkResult, Storage, SystemTimeSource,
    TimeSource,
};
use std::sync::Arc;
use tracing::info;

// ----------------------------------------------------------------------------
// SDK Builder
// ----------------------------------------------------------------------------

/// Builder for [`ChatSdk`]
pub struct SdkBuilder {
    storage: Arc<dyn Storage>,
    event_store: Arc<dyn EventStore>,
    config: SdkConfig,
    time_source: Arc<dyn TimeSource>,
    credentials: Option<Arc<dyn CredentialStore>>,
    console_logging: Option<LogLevel>,
}

impl SdkBuilder {
    /// Start from a storage collaborator with default configuration
    pub fn new<S: Storage + 'static>(storage: Arc<S>) -> Self {
        Self {
            event_store: Arc::clone(&storage) as Arc<dyn EventStore>,
            storage,
            config: SdkConfig::default(),
            time_source: Arc::new(SystemTimeSource::new()),
            credentials: None,
            console_logging: None,
        }
    }

    /// Set the SDK configuration
    pub fn with_config(mut self, config: SdkConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the wall clock, mainly for tests
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    /// Enable credential pass-through
    pub fn with_credential_store(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Install a console subscriber at `level` on build
    pub fn with_console_logging(mut self, level: LogLevel) -> Self {
        self.console_logging = Some(level);
        self
    }

    /// Leave logging to the host application
    pub fn with_no_logging(mut self) -> Self {
        self.console_logging = None;
        self
    }

    /// Validate the configuration, restore the queue and build the SDK
    pub async fn build(self) -> SdkResult<ChatSdk> {
        self.config.validate()?;
        if let Some(level) = self.console_logging {
            init_console_logging(level);
        }

        let sdk = ChatSdk::from_parts(
            self.config,
            self.storage,
            self.event_store,
            self.credentials,
            self.time_source,
        );

        let restored = sdk.event_queue().load_from_database().await?;
        let known_routes = sdk.persisted_routes().await?.len();
        info!(restored, known_routes, "chat sdk ready");
        Ok(sdk)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
