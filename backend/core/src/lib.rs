pub mod error;
pub mod traits;
pub mod types;

pub use error::{ErrorPayload, GatewayError, ProcessFailure};
pub use traits::{
    Clock, FetchRequest, FetchResponse, ProcessSpawner, SpawnOutput, SpawnRequest, SystemClock,
    UrlFetcher,
};
pub use types::{ApprovalStatus, ApprovalToken, GatedOutcome, TargetKind};
