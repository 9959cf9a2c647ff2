pub mod approval;
pub mod evaluator;
pub mod normalize;
pub mod pattern;
pub mod sensitive_path;
pub mod store;
pub mod validator;

pub use approval::{resolve_approval, Clearance};
pub use evaluator::{classify, Classification};
pub use normalize::{normalize, normalize_command, normalize_domain};
pub use pattern::{first_match, wildcard_matches};
pub use sensitive_path::{check_path, is_sensitive_path};
pub use store::PolicyStore;
pub use validator::{validate_exec_arguments, DANGEROUS_SEQUENCES};
