//! Upload Service
//!
//! Direct-to-storage uploads with an asynchronous processing lifecycle.
//! Clients ask for a time-limited credential, put their bytes straight into
//! object storage, then confirm. Confirmation publishes a processing event and
//! a worker drives the record to a terminal state.
//!
//! ## Features
//!
//! - **Presigned upload credentials**: one `PUT` URL per upload, scoped to a
//!   unique key under `uploads/{owner}/`
//! - **Lifecycle state machine**: PENDING → PROCESSING → COMPLETED | FAILED,
//!   guarded by conditional writes so a status never regresses
//! - **Event-driven processing**: events keyed by upload id, at-least-once,
//!   with redeliveries for finished uploads skipped
//! - **Swappable backends**: PostgreSQL or in-memory records, Kafka or
//!   in-process events
//!
//! ## Architecture
//!
//! ```text
//!  Client
//!    │ POST /uploads/initiate          ┌──────────────┐
//!    ├───────────────────────────────▶ │ Intake       │──▶ Credential Issuer (S3)
//!    │                                 └──────────────┘
//!    │ PUT bytes (presigned)                  │ PENDING
//!    ├──────────────────────▶ S3              ▼
//!    │                                 ┌──────────────┐
//!    │ POST /uploads/{id}/confirm      │ Record Store │◀──────────┐
//!    ├───────────────────────────────▶ └──────────────┘           │
//!    │            Confirmation ──▶ Event Bus ──▶ Processing Worker ┘
//!    │                                         PROCESSING → COMPLETED | FAILED
//!    │ GET /uploads/{id}
//!    └───────────────────────────────▶ Record Store
//! ```

pub mod api;
pub mod bus;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod intake;
pub mod issuer;
pub mod lifecycle;
pub mod model;
pub mod store;
pub mod strategy;
pub mod worker;

pub use api::{create_router, start_api_server, AppState};
pub use bus::{EventPublisher, InMemoryEventBus, KafkaEventPublisher};
pub use config::Config;
pub use confirmation::ConfirmationService;
pub use error::UploadError;
pub use intake::IntakeService;
pub use issuer::{CredentialIssuer, S3CredentialIssuer};
pub use lifecycle::{Lifecycle, Transition};
pub use model::{
    IssuedCredential, NewUpload, ProcessingEvent, PublishReceipt, ResultUrl, UploadDescriptor,
    UploadRecord, UploadStatus,
};
pub use store::{InMemoryRecordStore, PostgresRecordStore, RecordStore};
pub use strategy::{ProcessingError, ProcessingStrategy, SimulatedStrategy};
pub use worker::{ProcessingOutcome, ProcessingWorker, SkipReason};
