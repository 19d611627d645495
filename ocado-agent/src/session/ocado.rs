//! Auth client backed by the Ocado API.

use std::sync::Arc;

use async_trait::async_trait;
use ocado_api::OcadoClient;

use super::auth::{AuthClient, AuthError, RefreshedSession};

/// [`AuthClient`] implementation over the real refresh endpoint.
pub struct OcadoAuthClient {
    client: Arc<OcadoClient>,
}

impl OcadoAuthClient {
    pub fn new(client: Arc<OcadoClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AuthClient for OcadoAuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedSession, AuthError> {
        match self.client.refresh_session(refresh_token).await {
            Ok(refreshed) => Ok(RefreshedSession {
                session_token: refreshed.token,
                refresh_token: refreshed.refresh_token,
            }),
            Err(e) if e.is_unauthorized() => Err(AuthError::Rejected(
                "refresh token rejected; a new pair must be obtained from the Ocado app".to_string(),
            )),
            Err(e) => Err(AuthError::Transient(e.to_string())),
        }
    }
}
