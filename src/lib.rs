//! # a3s-cache-notify
//!
//! Change notification for entries of a read-through cache in the A3S
//! ecosystem.
//!
//! ## Overview
//!
//! `a3s-cache-notify` keeps a cache entry fresh on behalf of a consumer and
//! pushes an `UpdateEvent` every time its value changes. Consumers never
//! write their own polling, retry, or backoff logic; they register a watch
//! and read events until they cancel it.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_cache_notify::{MemoryConfig, MemoryProvider, Notifier, RequestInfo, TypeCapability};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> a3s_cache_notify::Result<()> {
//! let provider = MemoryProvider::new(
//!     MemoryConfig::default().with_type("health", TypeCapability::Blocking),
//! );
//! provider.set("health", "web", serde_json::json!({"passing": 3})).await?;
//!
//! let notifier = Notifier::new(provider);
//! let (tx, mut rx) = mpsc::channel(16);
//! let token = CancellationToken::new();
//!
//! notifier.notify(token.clone(), "health", RequestInfo::new("web"), "web-health", tx)?;
//!
//! if let Some(update) = rx.recv().await {
//!     println!("{} @ {}: {:?}", update.correlation_id, update.meta.index, update.result);
//! }
//! token.cancel();
//! # Ok(())
//! # }
//! ```
//!
//! ## Watch strategies
//!
//! - **blocking**: long-poll fetches for types that can hold a request
//!   open until a newer index exists; failures back off exponentially
//! - **polling**: fixed-cadence fetches for types that always answer
//!   promptly; paced by the request's max age and the age of the data
//!
//! ## Architecture
//!
//! - **CacheProvider** trait: the fetch port all cache backends implement
//! - **Notifier**: validates a watch and spawns its loop
//! - **BackoffPolicy** / **FreshnessPolicy**: retry and poll pacing
//! - **UpdateEvent**: what consumers receive

pub mod config;
pub mod error;
pub mod notify;
pub mod policy;
pub mod provider;
pub mod types;
mod watch;

// Re-export core types
pub use config::{BackoffConfig, FreshnessConfig, MemoryConfig, NotifyConfig};
pub use error::{NotifyError, Result};
pub use notify::{Notifier, WatchHandle};
pub use policy::{random_stagger, BackoffPolicy, FreshnessPolicy};
pub use provider::{CacheProvider, CacheRequest};
pub use types::{Fetched, RequestInfo, ResultMeta, TypeCapability, UpdateEvent};
pub use watch::UpdateCallback;

// Re-export providers for convenience
pub use provider::memory::MemoryProvider;
