//! Tollgate gateway: every fetch, exec and file exposure passes through normalization, policy
//! evaluation, the approval workflow and rate limiting before the capability runs.

pub mod gateway;
pub mod primitives;
pub mod rate_limit;

pub use gateway::{
    AllowlistChange, ExecParams, ExposeParams, ExposeResult, FetchParams, Gateway, GatewayParts,
    ReadFileResult,
};
pub use primitives::{ReqwestFetcher, TokioProcessSpawner};
pub use rate_limit::{RateDecision, SlidingWindowLimiter};
