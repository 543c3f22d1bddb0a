pub mod admission_manager;
pub mod followup_manager;

pub use admission_manager::{create_shared_admission_manager, SharedAdmissionManager};
pub use followup_manager::create_shared_followup_manager;
