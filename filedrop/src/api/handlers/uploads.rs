use crate::AppState;
use crate::api::models::uploads::{UploadForm, UploadResponse};
use crate::errors::Result;
use axum::{Json, extract::State};

#[utoipa::path(
    post,
    path = "/upload",
    tag = "uploads",
    summary = "Upload files",
    description = "Store zero or more files in the upload directory under their original names and echo the message back.

Files are sent as repeated `files` parts. Names are used exactly as submitted. What happens when a name is already taken depends on the configured collision policy (overwrite by default).",
    request_body(
        content = UploadForm,
        content_type = "multipart/form-data",
        description = "Required text field `message` plus optional `files` parts"
    ),
    responses(
        (status = 200, description = "Files stored", body = UploadResponse),
        (status = 400, description = "Body is not valid multipart form data"),
        (status = 409, description = "A destination already exists and the collision policy is `reject`"),
        (status = 422, description = "The `message` field is missing or `files` holds a non-file value"),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn upload_files(State(state): State<AppState>, form: UploadForm) -> Result<Json<UploadResponse>> {
    let UploadForm { message, files } = form;
    let result = state.uploads.handle_upload(message, files).await?;
    Ok(Json(result.into()))
}
