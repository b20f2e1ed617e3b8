pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod lookup;
pub mod model;
pub mod orchestrator;
pub mod poller;
pub mod provider;
pub mod recorder;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ProviderError, StorageError};
pub use model::{BuildStatus, Platform, StatusSnapshot, TriggerResult, TriggerType};
pub use orchestrator::{Orchestrator, PlatformOutcome, RunReport, RunSettings};
pub use poller::{BoundedPoller, PollOutcome, PollState};
pub use provider::{BuildLookup, ProviderSet, StatusProvider};
pub use recorder::{BuildCompletion, MemoryRecorder, RunRecorder};
