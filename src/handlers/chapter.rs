// src/handlers/chapter.rs

use std::{sync::Arc, time::Duration};

use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
};
use sqlx::PgPool;

use crate::{
    config::Config,
    error::AppError,
    models::chapter::{ChapterFileParams, ChapterForm, UploadedFile},
    services::{content, storage::FileStorage},
    utils::jwt::Claims,
};

pub async fn list_subchapters(
    State(pool): State<PgPool>,
    Path(parent_chapter_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(content::list_subchapters(&pool, parent_chapter_id).await?))
}

/// Signed download URL for a chapter PDF, gated by the caller's chapter cursor.
/// Admins are never gated.
pub async fn chapter_file(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    State(storage): State<Arc<dyn FileStorage>>,
    Extension(claims): Extension<Claims>,
    Path(chapter_id): Path<i64>,
    Query(params): Query<ChapterFileParams>,
) -> Result<impl IntoResponse, AppError> {
    let response = content::chapter_file_url(
        &pool,
        storage.as_ref(),
        claims.user_id()?,
        chapter_id,
        params.topic_id,
        claims.role == "admin",
        Duration::from_secs(config.signed_url_ttl_secs),
    )
    .await?;

    Ok(Json(response))
}

fn parse_id(field: &str, value: &str) -> Result<i64, AppError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| AppError::BadRequest(format!("Field '{}' must be a number", field)))
}

/// Collects the chapter form fields and the optional `chapter_file` part.
pub(crate) async fn read_chapter_form(mut multipart: Multipart) -> Result<ChapterForm, AppError> {
    let mut form = ChapterForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "chapter_file" {
            let original_name = field.file_name().unwrap_or("chapter.pdf").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?;
            if !bytes.is_empty() {
                form.file = Some(UploadedFile {
                    original_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(format!("Invalid field '{}': {}", name, e)))?;

        match name.as_str() {
            "topic_id" => form.topic_id = Some(parse_id(&name, &value)?),
            "chapter_num" => form.chapter_num = Some(value),
            "parent_chapter_id" if !value.trim().is_empty() => {
                form.parent_chapter_id = Some(parse_id(&name, &value)?)
            }
            "chapter_title" => form.chapter_title = Some(value),
            "chapter_description" => form.chapter_description = Some(value),
            _ => tracing::debug!(field = %name, "Ignoring unknown chapter form field"),
        }
    }

    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("topic_id", " 12 ").unwrap(), 12);
        assert!(matches!(parse_id("topic_id", "twelve"), Err(AppError::BadRequest(_))));
    }
}
