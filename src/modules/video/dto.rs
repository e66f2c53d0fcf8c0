use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub video_id: Uuid,
    #[validate(length(min = 1, max = 16, message = "Target format is required"))]
    pub format: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReformatRequest {
    #[validate(length(min = 1, max = 16, message = "Target format is required"))]
    pub format: String,
}

/// Multipart form accepted by the upload endpoint. Documentation only; the
/// handler reads the fields as a stream.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub video: Vec<u8>,
    pub title: Option<String>,
}
