use crate::common::response::{ErrorBody, MessageResponse};
use crate::modules::video::dto::{ConvertRequest, ReformatRequest, UploadForm};
use crate::modules::video::model::{VideoRecord, VideoState};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::video::handler::upload_video,
        crate::modules::video::handler::convert_video,
        crate::modules::video::handler::reformat_video,
        crate::modules::video::handler::download_video,
        crate::modules::video::handler::delete_video,
        crate::modules::video::handler::list_videos,
        crate::modules::video::handler::get_video,
    ),
    components(
        schemas(
            VideoRecord, VideoState, ConvertRequest, ReformatRequest, UploadForm,
            MessageResponse, ErrorBody,
        )
    ),
    tags(
        (name = "Videos", description = "Upload, conversion and download of videos")
    )
)]
pub struct ApiDoc;
