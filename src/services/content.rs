// src/services/content.rs

use std::{collections::HashMap, sync::Arc, time::Duration};

use sqlx::{PgConnection, PgPool};
use tokio::task::JoinHandle;

use crate::{
    error::{AppError, is_unique_violation},
    models::{
        chapter::{
            Chapter, ChapterFile, ChapterFileResponse, ChapterForm, ChapterSaved, ChapterTree,
            UploadedFile,
        },
        topic::{CreateTopicRequest, Topic, TopicWithChapters, UpdateTopicRequest},
    },
    services::{
        progress::{Cursor, chapter_position, get_or_create_progress},
        storage::FileStorage,
    },
    utils::html::clean_html,
};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// How often the reconciler looks for orphaned objects.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Deletions younger than this belong to a request that may still be uploading.
const RECONCILE_GRACE_MINUTES: i32 = 10;

const RECONCILE_BATCH: i64 = 100;

const CHAPTER_COLUMNS: &str =
    "id, topic_id, parent_chapter_id, chapter_number, title, sub_title, created_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Failed => "failed",
        }
    }
}

/// Storage key for a chapter PDF. The random suffix keeps replacements from
/// overwriting the object they replace.
pub fn object_key(topic_id: i64, chapter_number: &str) -> String {
    format!(
        "topic-{}/chapter-{}-{}.pdf",
        topic_id,
        chapter_number,
        uuid::Uuid::new_v4()
    )
}

pub fn ensure_pdf(file: &UploadedFile) -> Result<(), AppError> {
    let named_pdf = file.original_name.to_lowercase().ends_with(".pdf");
    let typed_pdf = file.content_type == PDF_CONTENT_TYPE;
    if !(named_pdf || typed_pdf) || !file.bytes.starts_with(b"%PDF") {
        return Err(AppError::BadRequest("Chapter file must be a PDF".to_string()));
    }
    Ok(())
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::BadRequest(format!("Missing field: {}", field)))
}

/// Groups chapters into top-level entries with their sub-chapters.
fn build_chapter_trees(chapters: Vec<Chapter>, file_names: &HashMap<i64, String>) -> Vec<ChapterTree> {
    let (top_level, subs): (Vec<Chapter>, Vec<Chapter>) = chapters
        .into_iter()
        .partition(|c| c.parent_chapter_id.is_none());

    let mut subs_by_parent: HashMap<i64, Vec<Chapter>> = HashMap::new();
    for sub in subs {
        if let Some(parent) = sub.parent_chapter_id {
            subs_by_parent.entry(parent).or_default().push(sub);
        }
    }

    top_level
        .into_iter()
        .map(|chapter| ChapterTree {
            sub_chapters: subs_by_parent.remove(&chapter.id).unwrap_or_default(),
            file_name: file_names.get(&chapter.id).cloned(),
            chapter,
        })
        .collect()
}

pub async fn list_topics(pool: &PgPool) -> Result<Vec<Topic>, AppError> {
    let topics = sqlx::query_as::<_, Topic>(
        "SELECT id, title, description, created_at FROM topics ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(topics)
}

pub async fn get_topic(pool: &PgPool, topic_id: i64) -> Result<Topic, AppError> {
    sqlx::query_as::<_, Topic>("SELECT id, title, description, created_at FROM topics WHERE id = $1")
        .bind(topic_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(AppError::topic_not_found)
}

/// Topic numbers are chosen by the admin and double as ids.
pub async fn create_topic(pool: &PgPool, req: &CreateTopicRequest) -> Result<Topic, AppError> {
    let topic = sqlx::query_as::<_, Topic>(
        r#"
        INSERT INTO topics (id, title, description)
        VALUES ($1, $2, $3)
        RETURNING id, title, description, created_at
        "#,
    )
    .bind(req.topic_num)
    .bind(clean_html(&req.topic_name))
    .bind(clean_html(&req.topic_description))
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Topic {} already exists", req.topic_num))
        } else {
            AppError::internal("Failed to create topic", e)
        }
    })?;

    tracing::info!(topic_id = topic.id, "Topic created");
    Ok(topic)
}

pub async fn update_topic(
    pool: &PgPool,
    topic_id: i64,
    req: &UpdateTopicRequest,
) -> Result<Topic, AppError> {
    sqlx::query_as::<_, Topic>(
        r#"
        UPDATE topics SET title = $1, description = $2
        WHERE id = $3
        RETURNING id, title, description, created_at
        "#,
    )
    .bind(clean_html(&req.topic_title))
    .bind(clean_html(&req.description))
    .bind(topic_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(AppError::topic_not_found)
}

async fn uploaded_file_names(
    pool: &PgPool,
    topic_id: Option<i64>,
) -> Result<HashMap<i64, String>, AppError> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT f.chapter_id, f.file_name
        FROM files f
        JOIN chapters c ON c.id = f.chapter_id
        WHERE f.upload_status = 'uploaded'
          AND ($1::BIGINT IS NULL OR c.topic_id = $1)
        "#,
    )
    .bind(topic_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Every topic with its chapter tree.
pub async fn topics_with_chapters(pool: &PgPool) -> Result<Vec<TopicWithChapters>, AppError> {
    let topics = list_topics(pool).await?;

    let chapters = sqlx::query_as::<_, Chapter>(&format!(
        "SELECT {} FROM chapters ORDER BY topic_id, id",
        CHAPTER_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    let file_names = uploaded_file_names(pool, None).await?;

    let mut by_topic: HashMap<i64, Vec<Chapter>> = HashMap::new();
    for chapter in chapters {
        by_topic.entry(chapter.topic_id).or_default().push(chapter);
    }

    Ok(topics
        .into_iter()
        .map(|topic| TopicWithChapters {
            chapters: build_chapter_trees(
                by_topic.remove(&topic.id).unwrap_or_default(),
                &file_names,
            ),
            id: topic.id,
            title: topic.title,
            description: topic.description,
        })
        .collect())
}

/// Top-level chapters of one topic, each with its sub-chapters.
pub async fn topic_chapters(pool: &PgPool, topic_id: i64) -> Result<Vec<ChapterTree>, AppError> {
    get_topic(pool, topic_id).await?;

    let chapters = sqlx::query_as::<_, Chapter>(&format!(
        "SELECT {} FROM chapters WHERE topic_id = $1 ORDER BY id",
        CHAPTER_COLUMNS
    ))
    .bind(topic_id)
    .fetch_all(pool)
    .await?;

    let file_names = uploaded_file_names(pool, Some(topic_id)).await?;
    Ok(build_chapter_trees(chapters, &file_names))
}

pub async fn list_subchapters(pool: &PgPool, parent_id: i64) -> Result<Vec<Chapter>, AppError> {
    let chapters = sqlx::query_as::<_, Chapter>(&format!(
        "SELECT {} FROM chapters WHERE parent_chapter_id = $1 ORDER BY id",
        CHAPTER_COLUMNS
    ))
    .bind(parent_id)
    .fetch_all(pool)
    .await?;
    Ok(chapters)
}

/// Signed URL for a chapter's PDF, or a locked marker when the student's
/// cursor has not reached it yet (earlier topics are open, the current topic
/// is open up to the cursor's chapter position). `bypass_gate` is set for admins.
pub async fn chapter_file_url(
    pool: &PgPool,
    storage: &dyn FileStorage,
    student_id: i64,
    chapter_id: i64,
    topic_id: Option<i64>,
    bypass_gate: bool,
    ttl: Duration,
) -> Result<ChapterFileResponse, AppError> {
    let file = sqlx::query_as::<_, ChapterFile>(
        r#"
        SELECT f.id, f.chapter_id, f.file_name, f.file_type, f.upload_status
        FROM files f
        JOIN chapters c ON c.id = f.chapter_id
        WHERE f.chapter_id = $1
          AND f.upload_status = 'uploaded'
          AND ($2::BIGINT IS NULL OR c.topic_id = $2)
        "#,
    )
    .bind(chapter_id)
    .bind(topic_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    if !bypass_gate {
        let progress = get_or_create_progress(pool, student_id).await?;
        let cursor = Cursor {
            chapter: progress.curr_chap_id,
            topic_id: progress.curr_topic_id,
        };
        let mut conn = pool.acquire().await?;
        let (owner, position) = chapter_position(&mut *conn, chapter_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Chapter not found".to_string()))?;
        if !cursor.unlocks(owner, position) {
            return Ok(ChapterFileResponse {
                url: None,
                locked: true,
            });
        }
    }

    let url = storage.signed_url(&file.file_name, ttl).await?;
    Ok(ChapterFileResponse {
        url: Some(url),
        locked: false,
    })
}

async fn set_upload_status(
    pool: &PgPool,
    file_id: i64,
    status: UploadStatus,
) -> Result<(), AppError> {
    sqlx::query("UPDATE files SET upload_status = $1 WHERE id = $2")
        .bind(status.as_str())
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Uploads after commit and records the outcome on the file row.
async fn upload_after_commit(
    pool: &PgPool,
    storage: &dyn FileStorage,
    file_id: i64,
    key: &str,
    file: UploadedFile,
) -> Result<UploadStatus, AppError> {
    let status = match storage.put_object(key, file.bytes, &file.content_type).await {
        Ok(()) => UploadStatus::Uploaded,
        Err(e) => {
            tracing::error!(file_id, key, "Chapter file upload failed: {}", e);
            UploadStatus::Failed
        }
    };
    set_upload_status(pool, file_id, status.clone()).await?;
    Ok(status)
}

async fn ensure_parent_in_topic(
    conn: &mut PgConnection,
    topic_id: i64,
    parent_chapter_id: Option<i64>,
) -> Result<(), AppError> {
    let topic_exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM topics WHERE id = $1)")
        .bind(topic_id)
        .fetch_one(&mut *conn)
        .await?;
    if !topic_exists {
        return Err(AppError::topic_not_found());
    }

    if let Some(parent) = parent_chapter_id {
        let parent_ok: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM chapters WHERE id = $1 AND topic_id = $2)",
        )
        .bind(parent)
        .bind(topic_id)
        .fetch_one(&mut *conn)
        .await?;
        if !parent_ok {
            return Err(AppError::NotFound("Parent chapter not found".to_string()));
        }
    }
    Ok(())
}

/// Creates a chapter and, when a PDF is attached, its file row.
///
/// The file row is committed as `pending` together with the chapter; the
/// object is uploaded afterwards and the row moves to `uploaded` or `failed`.
pub async fn create_chapter(
    pool: &PgPool,
    storage: &dyn FileStorage,
    form: ChapterForm,
) -> Result<ChapterSaved, AppError> {
    let topic_id = required(form.topic_id, "topic_id")?;
    let chapter_num = required(form.chapter_num, "chapter_num")?;
    let title = required(form.chapter_title, "chapter_title")?;
    let description = required(form.chapter_description, "chapter_description")?;
    if let Some(file) = &form.file {
        ensure_pdf(file)?;
    }

    let mut tx = pool.begin().await?;

    ensure_parent_in_topic(&mut *tx, topic_id, form.parent_chapter_id).await?;

    let chapter = sqlx::query_as::<_, Chapter>(&format!(
        r#"
        INSERT INTO chapters (topic_id, parent_chapter_id, chapter_number, title, sub_title)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        CHAPTER_COLUMNS
    ))
    .bind(topic_id)
    .bind(form.parent_chapter_id)
    .bind(chapter_num.trim())
    .bind(clean_html(&title))
    .bind(clean_html(&description))
    .fetch_one(&mut *tx)
    .await?;

    let pending = match form.file {
        Some(file) => {
            let key = object_key(topic_id, &chapter.chapter_number);
            let file_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO files (chapter_id, file_name, file_type, upload_status)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(chapter.id)
            .bind(&key)
            .bind(PDF_CONTENT_TYPE)
            .bind(UploadStatus::Pending.as_str())
            .fetch_one(&mut *tx)
            .await?;
            Some((file_id, key, file))
        }
        None => None,
    };

    tx.commit().await?;
    tracing::info!(chapter_id = chapter.id, topic_id, "Chapter created");

    let upload_status = match pending {
        Some((file_id, key, file)) => {
            Some(upload_after_commit(pool, storage, file_id, &key, file).await?)
        }
        None => None,
    };

    Ok(ChapterSaved {
        chapter,
        upload_status: upload_status.map(|s| s.as_str().to_string()),
    })
}

/// Updates chapter text and optionally replaces its PDF.
///
/// A replacement queues the old object in `pending_object_deletions` inside the
/// transaction. The old object is removed only after the new one is stored;
/// if the upload fails the previous file is restored and the queue entry dropped.
pub async fn update_chapter(
    pool: &PgPool,
    storage: &dyn FileStorage,
    chapter_id: i64,
    form: ChapterForm,
) -> Result<ChapterSaved, AppError> {
    let title = required(form.chapter_title, "chapter_title")?;
    let description = required(form.chapter_description, "chapter_description")?;
    if let Some(file) = &form.file {
        ensure_pdf(file)?;
    }

    let mut tx = pool.begin().await?;

    let chapter = sqlx::query_as::<_, Chapter>(&format!(
        r#"
        UPDATE chapters SET title = $1, sub_title = $2
        WHERE id = $3
        RETURNING {}
        "#,
        CHAPTER_COLUMNS
    ))
    .bind(clean_html(&title))
    .bind(clean_html(&description))
    .bind(chapter_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Chapter not found".to_string()))?;

    let Some(file) = form.file else {
        tx.commit().await?;
        tracing::info!(chapter_id, "Chapter updated");
        return Ok(ChapterSaved {
            chapter,
            upload_status: None,
        });
    };

    let key = object_key(chapter.topic_id, &chapter.chapter_number);

    let previous = sqlx::query_as::<_, ChapterFile>(
        r#"
        SELECT id, chapter_id, file_name, file_type, upload_status
        FROM files WHERE chapter_id = $1
        FOR UPDATE
        "#,
    )
    .bind(chapter_id)
    .fetch_optional(&mut *tx)
    .await?;

    let file_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO files (chapter_id, file_name, file_type, upload_status)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (chapter_id) DO UPDATE
        SET file_name = EXCLUDED.file_name,
            file_type = EXCLUDED.file_type,
            upload_status = EXCLUDED.upload_status
        RETURNING id
        "#,
    )
    .bind(chapter_id)
    .bind(&key)
    .bind(PDF_CONTENT_TYPE)
    .bind(UploadStatus::Pending.as_str())
    .fetch_one(&mut *tx)
    .await?;

    let queued_deletion = match &previous {
        Some(old) => {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO pending_object_deletions (object_key) VALUES ($1) RETURNING id",
            )
            .bind(&old.file_name)
            .fetch_one(&mut *tx)
            .await?;
            Some(id)
        }
        None => None,
    };

    tx.commit().await?;
    tracing::info!(chapter_id, key = %key, "Chapter updated, file replacement pending");

    let status = upload_after_commit(pool, storage, file_id, &key, file).await?;

    match (status.clone(), previous, queued_deletion) {
        (UploadStatus::Uploaded, Some(old), Some(deletion_id)) => {
            match storage.delete_object(&old.file_name).await {
                Ok(()) => {
                    sqlx::query("DELETE FROM pending_object_deletions WHERE id = $1")
                        .bind(deletion_id)
                        .execute(pool)
                        .await?;
                }
                Err(e) => tracing::warn!(
                    key = %old.file_name,
                    "Old chapter file not deleted, left for reconciler: {}",
                    e
                ),
            }
        }
        (UploadStatus::Failed, Some(old), Some(deletion_id)) => {
            let mut tx = pool.begin().await?;
            sqlx::query(
                "UPDATE files SET file_name = $1, file_type = $2, upload_status = $3 WHERE id = $4",
            )
            .bind(&old.file_name)
            .bind(&old.file_type)
            .bind(&old.upload_status)
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM pending_object_deletions WHERE id = $1")
                .bind(deletion_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::warn!(chapter_id, "Replacement upload failed, previous file restored");
        }
        _ => {}
    }

    Ok(ChapterSaved {
        chapter,
        upload_status: Some(status.as_str().to_string()),
    })
}

#[derive(sqlx::FromRow)]
struct PendingDeletion {
    id: i64,
    object_key: String,
}

/// Retries queued object deletions. Returns how many were completed.
pub async fn reconcile_pending_deletions(
    pool: &PgPool,
    storage: &dyn FileStorage,
) -> Result<usize, AppError> {
    let pending = sqlx::query_as::<_, PendingDeletion>(
        r#"
        SELECT id, object_key
        FROM pending_object_deletions
        WHERE created_at < NOW() - make_interval(mins => $1)
        ORDER BY id
        LIMIT $2
        "#,
    )
    .bind(RECONCILE_GRACE_MINUTES)
    .bind(RECONCILE_BATCH)
    .fetch_all(pool)
    .await?;

    let mut done = 0;
    for item in pending {
        match storage.delete_object(&item.object_key).await {
            Ok(()) => {
                sqlx::query("DELETE FROM pending_object_deletions WHERE id = $1")
                    .bind(item.id)
                    .execute(pool)
                    .await?;
                done += 1;
            }
            Err(e) => {
                tracing::warn!(key = %item.object_key, "Queued deletion failed: {}", e);
                sqlx::query("UPDATE pending_object_deletions SET attempts = attempts + 1 WHERE id = $1")
                    .bind(item.id)
                    .execute(pool)
                    .await?;
            }
        }
    }

    Ok(done)
}

/// Runs `reconcile_pending_deletions` on a fixed interval for the life of the process.
pub fn spawn_deletion_reconciler(pool: PgPool, storage: Arc<dyn FileStorage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(RECONCILE_INTERVAL);
        loop {
            tick.tick().await;
            match reconcile_pending_deletions(&pool, storage.as_ref()).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(deleted = n, "Reconciled queued object deletions"),
                Err(e) => tracing::error!("Deletion reconciler failed: {}", e),
            }
        }
    })
}
