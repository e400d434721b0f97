use serde::Deserialize;

use super::models::{JoinGroupReply, JoinGroupRequest};
use super::{require_id, ApiClient, ApiError};

#[derive(Debug, Deserialize)]
struct QrResponse {
    qr_url: String,
}

impl ApiClient {
    /// Community group invite QR image URL
    pub async fn community_qr(&self) -> Result<String, ApiError> {
        let response: QrResponse = self.get_json("/api/community/qr").await?;
        Ok(response.qr_url)
    }

    pub async fn join_group(&self, request: &JoinGroupRequest) -> Result<JoinGroupReply, ApiError> {
        require_id("user_id", &request.user_id)?;
        require_id("membership_level", &request.membership_level)?;
        self.post_json("/api/community/join-group", request).await
    }
}
