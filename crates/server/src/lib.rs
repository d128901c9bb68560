//! Server crate for the movie command bus.
//!
//! Everything that runs on top of the broker and the store lives here:
//! the worker side (dispatcher, rating consumer, response publisher), the
//! caller side (emitter, response aggregator), the error channel, and the
//! `MovieService` that wires them together.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod error_channel;
pub mod publisher;
pub mod ratings;
pub mod service;

pub use aggregator::{ResponseAggregator, SearchHandle, SearchOutcome};
pub use config::ServiceConfig;
pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use emitter::{CommandEmitter, MovieRequest};
pub use error::{DispatchError, EmitError};
pub use error_channel::{ErrorListener, ErrorPublisher};
pub use publisher::ResponsePublisher;
pub use ratings::RatingConsumer;
pub use service::{MovieService, UploadReport};
