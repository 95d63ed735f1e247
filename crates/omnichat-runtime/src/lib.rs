//! OmniChat Runtime Engine
//!
//! This crate contains the resilience core of the OmniChat SDK:
//! - `ChatSdk`: the coordinator owning route plugins and orchestrating the managers
//! - `RetryManager`: bounded exponential-backoff retries keyed by operation id
//! - `RouteStateManager`: per-route state machine with callbacks and subscriptions
//! - `ReconnectionManager`: reconnection eligibility, backoff and cancellation
//! - `EventQueueManager`: durable offline event queue drained on connect
//!
//! `omnichat-core` provides the stable API definitions; this crate is the
//! engine built on them.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use omnichat_core::SdkConfig;
//! use omnichat_harness::{MemoryStorage, MockRoute};
//! use omnichat_runtime::SdkBuilder;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sdk = SdkBuilder::new(Arc::new(MemoryStorage::new()))
//!     .with_config(SdkConfig::default())
//!     .build()
//!     .await?;
//!
//! let route_id = sdk.register_route(Arc::new(MockRoute::new("discord-main"))).await?;
//! let mut states = sdk.subscribe_route_state(&route_id);
//! sdk.connect_route(&route_id).await?;
//! while let Some(state) = states.next().await {
//!     println!("{route_id}: {state}");
//! #   break;
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod logging;
pub mod maintenance;
pub mod managers;
mod sdk;

pub use builder::SdkBuilder;
pub use logging::init_console_logging;
pub use maintenance::CleanupReport;
pub use managers::*;
pub use sdk::ChatSdk;

// Re-export core types for convenience
pub use omnichat_core::{
    ConversationId, Event, EventType, Message, OutgoingMedia, Platform, ReconnectionConfig,
    RetryPolicy, RouteId, RoutePlugin, RouteState, SdkConfig, SdkError, SdkResult,
};
