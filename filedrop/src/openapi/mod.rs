//! OpenAPI documentation, served at `/openapi.json` and rendered at `/docs`.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "filedrop",
        description = "Store multipart file uploads in a local directory and echo a message back."
    ),
    paths(api::handlers::uploads::upload_files),
    components(schemas(
        api::models::uploads::UploadForm,
        api::models::uploads::UploadResponse,
        api::models::uploads::SavedFileResponse,
    )),
    tags(
        (name = "uploads", description = "File uploads")
    )
)]
pub struct ApiDoc;
