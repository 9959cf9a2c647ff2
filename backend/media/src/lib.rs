//! Ephemeral file exposure: a TTL-indexed registry of isolated file copies and the local
//! HTTP server that serves them by opaque id.

pub mod media_server;
pub mod mime_detect;
pub mod registry;

pub use media_server::{exposure_router, LocalExposureServer, LocalServerState, ServerBinding};
pub use mime_detect::{detect_mime_type, is_inline_safe};
pub use registry::{ExposeOptions, FileRegistration, FileRegistry, RegistryLimits};
