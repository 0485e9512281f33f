//! psp_bridge - Payment Service Provider Integration Core
//!
//! Connects a payments platform to external providers (card acquirers,
//! banking APIs, open-banking aggregators) through one plugin contract.
//!
//! # Modules
//!
//! - [`money`] - Decimal string ↔ integer minor-unit codec, `CODE/precision` assets
//! - [`models`] - Canonical accounts, balances, payments, orders and events
//! - [`plugin`] - Plugin trait, capabilities, lifecycle, provider registry
//! - [`pagination`] - Resumable fetch cursors and fill-until-enough paging
//! - [`webhook`] - Verify → trim → translate pipeline for inbound pushes
//! - [`stream`] - Push-stream (listen-key websocket) variant
//! - [`connector`] - Installed connector: gating, workflow, webhook dispatch
//! - [`connectors`] - Built-in providers (sandbox)
//! - [`storage`] - Cursor and entity persistence seam
//! - [`config`] / [`logging`] - Application config and tracing setup

// Shared error taxonomy - must be first!
pub mod error;

// Value types
pub mod models;
pub mod money;

// Plugin contract and machinery
pub mod pagination;
pub mod plugin;
pub mod storage;
pub mod stream;
pub mod webhook;

// Runtime
pub mod config;
pub mod connector;
pub mod connectors;
pub mod logging;

// Convenient re-exports at crate root
pub use config::{AppConfig, ConfigError, ConnectorEntry};
pub use connector::{Connector, SyncReport};
pub use error::{ErrorClass, PluginError, PluginResult};
pub use models::{
    PspAccount, PspBalance, PspConversion, PspOrder, PspOther, PspPayment, PspPaymentInitiation,
    PspWebhook, WebhookConfig, WebhookEvent,
};
pub use money::{CurrencyTable, MoneyError, format_amount, parse_amount};
pub use pagination::{FetchEngine, FetchKind, Paginator};
pub use plugin::{Capability, CapabilitySet, Plugin, PluginType, Registry};
pub use storage::{MemoryStorage, Storage};
