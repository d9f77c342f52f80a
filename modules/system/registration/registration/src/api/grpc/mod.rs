pub mod error;
pub mod metrics;
pub mod service;

pub use error::registration_error_to_status;
pub use metrics::RegistrationMetrics;
pub use service::RegisterService;
