//! Domain types and models

pub mod events;
pub mod health;
pub mod jobs;
pub mod protocol;

pub use events::{BufferedMessage, ClientAck, EventEnvelope};
pub use health::{DegradationMode, DegradationStatus, ServiceHealth, ServiceStatus};
pub use jobs::{DlqStats, JobFailure, JobPayload, QueuedJob, SystemSnapshot};
pub use protocol::{ClientMessage, ServerMessage, SubscriptionAction};
