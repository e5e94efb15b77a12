use crate::AppState;
use crate::errors::Error;
use crate::uploads::{Attachment, SavedFile, UploadResult};
use axum::extract::{FromRequest, Multipart, Request};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Multipart form accepted by `POST /upload`.
///
/// The whole body is read before the request reaches the handler, so a submission that lacks
/// `message` is rejected without touching the upload directory. File parts are streamed into
/// spools (see [`crate::uploads::Spool`]) rather than collected in memory. Fields other than
/// `message` and `files` are ignored; a repeated `message` keeps its last value.
#[derive(Debug, ToSchema)]
pub struct UploadForm {
    /// Text message echoed back in the response
    pub message: String,
    /// Files to store in the upload directory, in order
    #[schema(value_type = Vec<String>, format = Binary)]
    pub files: Vec<Attachment>,
}

impl FromRequest<AppState> for UploadForm {
    type Rejection = Error;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let mut multipart = Multipart::from_request(req, state).await.map_err(|e| Error::BadRequest {
            message: e.body_text(),
        })?;

        let mut message: Option<String> = None;
        let mut files = Vec::new();

        while let Some(mut field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
            message: format!("Failed to parse multipart data: {}", e),
        })? {
            let field_name = field.name().unwrap_or("").to_string();

            match field_name.as_str() {
                "message" => {
                    message = Some(field.text().await.map_err(|e| Error::BadRequest {
                        message: format!("Failed to read message field: {}", e),
                    })?);
                }
                "files" => {
                    let Some(filename) = field.file_name().map(|s| s.to_string()) else {
                        return Err(Error::InvalidField {
                            field: "files".to_string(),
                            message: "Expected a file upload in field files".to_string(),
                        });
                    };
                    let mut spool = state.uploads.spool();
                    while let Some(chunk) = field.chunk().await.map_err(|e| Error::BadRequest {
                        message: format!("Failed to read file {}: {}", filename, e),
                    })? {
                        spool.write(&chunk).await?;
                    }
                    let data = spool.finish().await?;
                    tracing::debug!(filename = %filename, bytes = data.len(), "Attachment received");
                    files.push(Attachment { filename, data });
                }
                _ => {}
            }
        }

        let message = message.ok_or_else(|| Error::MissingField {
            field: "message".to_string(),
        })?;

        Ok(Self { message, files })
    }
}

/// A stored attachment as reported to the client
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct SavedFileResponse {
    /// Filename as submitted
    pub filename: String,
    /// Path the file was written to
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub message: String,
    pub files: Vec<SavedFileResponse>,
}

impl From<SavedFile> for SavedFileResponse {
    fn from(saved: SavedFile) -> Self {
        Self {
            filename: saved.filename,
            path: saved.path.to_string_lossy().into_owned(),
        }
    }
}

impl From<UploadResult> for UploadResponse {
    fn from(result: UploadResult) -> Self {
        Self {
            message: result.message,
            files: result.files.into_iter().map(Into::into).collect(),
        }
    }
}
