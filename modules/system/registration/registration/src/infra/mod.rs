pub mod directory;
pub mod local;

use std::sync::Arc;

use registration_sdk::RegistrationBackend;

use crate::config::BackendConfig;

pub use directory::DirectoryBackend;
pub use local::LocalBackend;

/// Build the backend selected by configuration.
///
/// # Errors
/// Returns an error if a remote backend is misconfigured or unreachable.
pub async fn build_backend(cfg: &BackendConfig) -> anyhow::Result<Arc<dyn RegistrationBackend>> {
    match cfg {
        BackendConfig::Local => {
            tracing::info!("using local registration backend");
            Ok(Arc::new(LocalBackend::new()))
        }
        BackendConfig::Directory(dir) => {
            tracing::info!(endpoint = %dir.endpoint, "using directory registration backend");
            Ok(Arc::new(DirectoryBackend::connect(dir.clone()).await?))
        }
    }
}
