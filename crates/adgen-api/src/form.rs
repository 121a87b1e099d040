//! Multipart form parsing.

use adgen_pipeline::{UploadDraft, UploadedFile};
use axum::extract::Multipart;

use crate::error::{ApiError, ApiResult};

/// Read the generation form. Unknown fields are ignored; nothing is validated here.
pub async fn read_draft(mut multipart: Multipart) -> ApiResult<UploadDraft> {
    let mut draft = UploadDraft::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart: {e}")))?
    {
        let name = field.name().map(str::to_string).unwrap_or_default();

        match name.as_str() {
            "product_image" | "background_image" | "presenter_image" => {
                let filename = field.file_name().map(str::to_string).unwrap_or_default();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read {name}: {e}")))?;
                let file = Some(UploadedFile::new(filename, bytes.to_vec()));
                match name.as_str() {
                    "product_image" => draft.product_image = file,
                    "background_image" => draft.background_image = file,
                    _ => draft.presenter_image = file,
                }
            }
            "script" | "background_color" | "mode" | "canvas" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read {name}: {e}")))?;
                match name.as_str() {
                    "script" => draft.script = Some(text),
                    "background_color" => draft.background_color = Some(text),
                    "mode" => draft.mode = Some(text),
                    _ => draft.canvas = Some(text),
                }
            }
            _ => {}
        }
    }

    Ok(draft)
}
