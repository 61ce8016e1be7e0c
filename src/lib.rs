//! # receta-live
//!
//! Realtime state for a prescription marketplace client: live subscriptions
//! over the backend's `pedidos` and `recetas/{id}/cotizaciones` collections,
//! projected into ordered, typed, client-visible state.
//!
//! ## Pieces
//!
//! - **Domain types** - [`domain::Order`], [`domain::Quote`], [`domain::ActiveOrder`]
//! - **Store contract** - [`store::DocumentStore`], [`store::Query`], [`store::RawDocument`],
//!   with [`store::memory::InMemoryStore`] for tests and demos
//! - **Mapper** - raw documents to domain types ([`mapper::map_order`], [`mapper::map_quote`])
//! - **Session** - injected current-user capability ([`session::Session`])
//! - **Subscriptions** - one actor per live query ([`subscription::SubscriptionSystem`])
//! - **Configuration** - blocking statuses and buffers ([`config::LiveConfig`])
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use receta_live::config::LiveConfig;
//! # use receta_live::session::Session;
//! # use receta_live::store::memory::InMemoryStore;
//! # use receta_live::subscription::SubscriptionSystem;
//! # async fn demo() -> Result<(), receta_live::error::SubscriptionError> {
//! let (store, _store_task) = InMemoryStore::start(32);
//! let session = Session::signed_in("user_1");
//! let mut system = SubscriptionSystem::new(Arc::new(store), session, LiveConfig::default());
//!
//! let active = system.watch_active_order(Some("receta_1".to_string()));
//! let state = active.wait_for(|s| !s.loading).await?;
//! if state.blocks_new_quotes() {
//!     // hide "request new quotes"
//! }
//!
//! system.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod mapper;
pub mod session;
pub mod store;
pub mod subscription;
pub mod telemetry;

#[cfg(test)]
mod mock_framework;
