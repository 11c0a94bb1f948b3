// src/models/chapter.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'chapters' table. Sub-chapters point at their parent.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub topic_id: i64,
    pub parent_chapter_id: Option<i64>,
    pub chapter_number: String,
    pub title: String,
    pub sub_title: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'files' table: metadata of the PDF attached to a chapter.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChapterFile {
    pub id: i64,
    pub chapter_id: i64,
    pub file_name: String,
    pub file_type: String,
    /// 'pending', 'uploaded' or 'failed'.
    pub upload_status: String,
}

/// A top-level chapter with its sub-chapters and file name.
#[derive(Debug, Serialize)]
pub struct ChapterTree {
    #[serde(flatten)]
    pub chapter: Chapter,
    pub sub_chapters: Vec<Chapter>,
    pub file_name: Option<String>,
}

/// Query for `/chapters/files/{chapter_id}`.
#[derive(Debug, Deserialize)]
pub struct ChapterFileParams {
    pub topic_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ChapterFileResponse {
    /// Signed URL, absent while the chapter is still locked for the caller.
    pub url: Option<String>,
    pub locked: bool,
}

/// Text fields of a chapter upload, collected from multipart form data.
#[derive(Debug, Default)]
pub struct ChapterForm {
    pub topic_id: Option<i64>,
    /// Display number, e.g. "3" or "3.1" for a sub-chapter.
    pub chapter_num: Option<String>,
    pub parent_chapter_id: Option<i64>,
    pub chapter_title: Option<String>,
    pub chapter_description: Option<String>,
    pub file: Option<UploadedFile>,
}

#[derive(Debug)]
pub struct UploadedFile {
    pub original_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Response of chapter create/update. `upload_status` is present when a file was sent.
#[derive(Debug, Serialize)]
pub struct ChapterSaved {
    #[serde(flatten)]
    pub chapter: Chapter,
    pub upload_status: Option<String>,
}
