pub mod event;
pub mod manager;
pub mod types;

pub use event::VerificationEvent;
pub use manager::{create_shared_verification_registry, SharedVerificationRegistry};
pub use types::{TransitionPolicy, VerificationState};
