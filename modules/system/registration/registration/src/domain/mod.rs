pub mod error;
pub mod index;
pub mod manager;

pub use error::RegistrationError;
pub use index::{Registration, RegistrationIndex};
pub use manager::RegistrationManager;
