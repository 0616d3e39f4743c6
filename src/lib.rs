//! Event delivery and subject identity for feature flag client SDKs.
//!
//! # Overview
//!
//! The crate has two independent building blocks that SDKs compose at the call site:
//!
//! - [`TransientContextProcessor`] takes an evaluation [`Context`] and makes sure every record in
//!   it has a key. Records marked transient (`anonymous` for legacy users, `transient` for other
//!   kinds) get a generated key that is persisted in [`PersistentStorage`] and reused afterwards.
//! - [`EventSender`] ships batches of analytics events to the events service. It POSTs the whole
//!   batch when it can (retrying once on recoverable failures) and falls back to image-pixel GET
//!   requests, split into URL-sized chunks, when the [`Platform`] does not allow POST.
//!
//! Host capabilities (HTTP, storage, identifier generation) are consumed through small traits.
//! [`ReqwestPlatform`] and [`InMemoryStorage`] are ready-made implementations.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Event delivery never fails from the caller's
//! point of view: delivery is best-effort and problems are logged. Context processing returns
//! errors for a missing or invalid context, and it's up to the caller to decide what to do.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the `ld_common`
//! target. Consider integrating a `log`-compatible logger implementation for better visibility.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod context;
pub mod event_sender;
pub mod platform;
pub mod storage;
pub mod transient_context;

mod config;
mod error;
mod headers;
mod http_errors;

pub use config::{
    ApplicationInfo, EventSenderConfig, SdkMetadata, EVENT_SCHEMA_VERSION, MAX_URL_LENGTH,
};
pub use context::{Context, ContextKind, ContextRecord};
pub use error::{Error, Result};
pub use event_sender::{DeliveryResult, EventSender};
pub use headers::sdk_headers;
pub use http_errors::is_http_error_recoverable;
pub use platform::{FallbackPing, HttpResponse, HttpTransport, Platform, ReqwestPlatform};
pub use storage::{InMemoryStorage, PersistentStorage};
pub use transient_context::{IdGenerator, TransientContextProcessor, UuidV1Generator};
