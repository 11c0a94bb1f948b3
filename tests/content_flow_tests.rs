// tests/content_flow_tests.rs
//
// Chapter files against a real Postgres and an in-process store. Run with
// `DATABASE_URL=... cargo test -- --ignored`.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use lcms_backend::{
    error::AppError,
    models::{
        chapter::{ChapterForm, UploadedFile},
        topic::CreateTopicRequest,
    },
    services::{
        content::{self, PDF_CONTENT_TYPE},
        progress,
        storage::{FileStorage, MemoryStorage},
    },
};
use rand::Rng;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const TTL: Duration = Duration::from_secs(60);

async fn test_pool() -> PgPool {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");
    pool
}

/// Memory store whose writes and deletes can be switched to fail.
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryStorage,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FlakyStorage {
    fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }
}

#[async_trait]
impl FileStorage for FlakyStorage {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), AppError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(AppError::InternalServerError("put refused".to_string()));
        }
        self.inner.put_object(key, body, content_type).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), AppError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::InternalServerError("delete refused".to_string()));
        }
        self.inner.delete_object(key).await
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, AppError> {
        self.inner.signed_url(key, ttl).await
    }
}

async fn seed_student(pool: &PgPool) -> i64 {
    let email = format!("{}@example.com", uuid::Uuid::new_v4().simple());
    sqlx::query_scalar(
        "INSERT INTO users (username, email, password) VALUES ('student', $1, 'x') RETURNING id",
    )
    .bind(email)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn seed_topic(pool: &PgPool) -> i64 {
    let topic_num = rand::thread_rng().gen_range(100_000..1_000_000_000);
    content::create_topic(
        pool,
        &CreateTopicRequest {
            topic_num,
            topic_name: "Storage".to_string(),
            topic_description: "<p>Blocks</p>".to_string(),
        },
    )
    .await
    .unwrap()
    .id
}

fn pdf() -> UploadedFile {
    UploadedFile {
        original_name: "notes.pdf".to_string(),
        content_type: PDF_CONTENT_TYPE.to_string(),
        bytes: b"%PDF-1.4 notes".to_vec(),
    }
}

fn chapter_form(topic_id: i64, number: &str, file: Option<UploadedFile>) -> ChapterForm {
    ChapterForm {
        topic_id: Some(topic_id),
        chapter_num: Some(number.to_string()),
        parent_chapter_id: None,
        chapter_title: Some(format!("Chapter {}", number)),
        chapter_description: Some("<p>Read me</p>".to_string()),
        file,
    }
}

async fn file_row(pool: &PgPool, chapter_id: i64) -> (String, String) {
    sqlx::query_as("SELECT file_name, upload_status FROM files WHERE chapter_id = $1")
        .bind(chapter_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn queued(pool: &PgPool, key: &str) -> bool {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pending_object_deletions WHERE object_key = $1)")
        .bind(key)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn place_cursor(pool: &PgPool, student_id: i64, topic_id: i64) {
    progress::get_or_create_progress(pool, student_id).await.unwrap();
    sqlx::query("UPDATE user_progress SET curr_topic_id = $1, curr_chap_id = 1 WHERE student_id = $2")
        .bind(topic_id)
        .bind(student_id)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn create_chapter_records_upload_outcome() {
    let pool = test_pool().await;
    let storage = FlakyStorage::default();
    let topic = seed_topic(&pool).await;

    let saved = content::create_chapter(&pool, &storage, chapter_form(topic, "1", Some(pdf())))
        .await
        .unwrap();
    assert_eq!(saved.upload_status.as_deref(), Some("uploaded"));
    let (key, status) = file_row(&pool, saved.chapter.id).await;
    assert_eq!(status, "uploaded");
    assert!(storage.contains(&key));

    // The chapter survives a failed upload, its file row says so
    storage.fail_puts.store(true, Ordering::SeqCst);
    let saved = content::create_chapter(&pool, &storage, chapter_form(topic, "2", Some(pdf())))
        .await
        .unwrap();
    assert_eq!(saved.upload_status.as_deref(), Some("failed"));
    let (key, status) = file_row(&pool, saved.chapter.id).await;
    assert_eq!(status, "failed");
    assert!(!storage.contains(&key));

    // Without a file there is no status at all
    let saved = content::create_chapter(&pool, &storage, chapter_form(topic, "3", None))
        .await
        .unwrap();
    assert!(saved.upload_status.is_none());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn replacing_a_file_removes_the_old_object() {
    let pool = test_pool().await;
    let storage = FlakyStorage::default();
    let topic = seed_topic(&pool).await;

    let saved = content::create_chapter(&pool, &storage, chapter_form(topic, "1", Some(pdf())))
        .await
        .unwrap();
    let chapter = saved.chapter.id;
    let (old_key, _) = file_row(&pool, chapter).await;

    let updated = content::update_chapter(&pool, &storage, chapter, chapter_form(topic, "1", Some(pdf())))
        .await
        .unwrap();
    assert_eq!(updated.upload_status.as_deref(), Some("uploaded"));

    let (new_key, status) = file_row(&pool, chapter).await;
    assert_ne!(new_key, old_key);
    assert_eq!(status, "uploaded");
    assert!(storage.contains(&new_key));
    assert!(!storage.contains(&old_key));
    assert!(!queued(&pool, &old_key).await);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn failed_replacement_restores_previous_file() {
    let pool = test_pool().await;
    let storage = FlakyStorage::default();
    let topic = seed_topic(&pool).await;

    let saved = content::create_chapter(&pool, &storage, chapter_form(topic, "1", Some(pdf())))
        .await
        .unwrap();
    let chapter = saved.chapter.id;
    let (old_key, _) = file_row(&pool, chapter).await;

    storage.fail_puts.store(true, Ordering::SeqCst);
    let updated = content::update_chapter(&pool, &storage, chapter, chapter_form(topic, "1", Some(pdf())))
        .await
        .unwrap();
    assert_eq!(updated.upload_status.as_deref(), Some("failed"));

    assert_eq!(file_row(&pool, chapter).await, (old_key.clone(), "uploaded".to_string()));
    assert!(storage.contains(&old_key));
    assert!(!queued(&pool, &old_key).await);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn undeletable_old_object_stays_queued() {
    let pool = test_pool().await;
    let storage = FlakyStorage::default();
    let topic = seed_topic(&pool).await;

    let saved = content::create_chapter(&pool, &storage, chapter_form(topic, "1", Some(pdf())))
        .await
        .unwrap();
    let chapter = saved.chapter.id;
    let (old_key, _) = file_row(&pool, chapter).await;

    storage.fail_deletes.store(true, Ordering::SeqCst);
    let updated = content::update_chapter(&pool, &storage, chapter, chapter_form(topic, "1", Some(pdf())))
        .await
        .unwrap();
    assert_eq!(updated.upload_status.as_deref(), Some("uploaded"));
    assert!(storage.contains(&old_key));
    assert!(queued(&pool, &old_key).await);
}

async fn queue_deletion(pool: &PgPool, key: &str, age_minutes: i32) {
    sqlx::query(
        "INSERT INTO pending_object_deletions (object_key, created_at) VALUES ($1, NOW() - make_interval(mins => $2))",
    )
    .bind(key)
    .bind(age_minutes)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn reconciler_deletes_stale_queue_entries() {
    let pool = test_pool().await;
    let storage = FlakyStorage::default();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let stale = format!("orphans/stale-{}.pdf", suffix);
    let fresh = format!("orphans/fresh-{}.pdf", suffix);

    for key in [&stale, &fresh] {
        storage.put_object(key, b"%PDF".to_vec(), PDF_CONTENT_TYPE).await.unwrap();
    }
    queue_deletion(&pool, &stale, 11).await;
    queue_deletion(&pool, &fresh, 0).await;

    // A failing store keeps the entry and counts the try
    storage.fail_deletes.store(true, Ordering::SeqCst);
    assert_eq!(content::reconcile_pending_deletions(&pool, &storage).await.unwrap(), 0);
    assert!(queued(&pool, &stale).await);
    let attempts: i32 = sqlx::query_scalar("SELECT attempts FROM pending_object_deletions WHERE object_key = $1")
        .bind(&stale)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(attempts >= 1);

    // Other tests may have left stale entries, so drain until ours is gone
    storage.fail_deletes.store(false, Ordering::SeqCst);
    while queued(&pool, &stale).await {
        let done = content::reconcile_pending_deletions(&pool, &storage).await.unwrap();
        assert!(done > 0);
    }
    assert!(!storage.contains(&stale));

    // Still inside the grace period
    assert!(queued(&pool, &fresh).await);
    assert!(storage.contains(&fresh));
}

async fn is_locked(pool: &PgPool, storage: &MemoryStorage, student_id: i64, chapter_id: i64) -> bool {
    content::chapter_file_url(pool, storage, student_id, chapter_id, None, false, TTL)
        .await
        .unwrap()
        .locked
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn chapter_files_unlock_with_the_cursor() {
    let pool = test_pool().await;
    let storage = MemoryStorage::new();
    let student = seed_student(&pool).await;
    let a = seed_topic(&pool).await;
    let b = seed_topic(&pool).await;
    let (earlier, current) = (a.min(b), a.max(b));

    let mut chapters = Vec::new();
    for number in ["1", "2", "3"] {
        let saved = content::create_chapter(&pool, &storage, chapter_form(current, number, Some(pdf())))
            .await
            .unwrap();
        chapters.push(saved.chapter.id);
    }
    let earlier_chapter = content::create_chapter(&pool, &storage, chapter_form(earlier, "1", Some(pdf())))
        .await
        .unwrap()
        .chapter
        .id;
    place_cursor(&pool, student, current).await;

    assert!(!is_locked(&pool, &storage, student, chapters[0]).await);
    assert!(is_locked(&pool, &storage, student, chapters[1]).await);
    assert!(is_locked(&pool, &storage, student, chapters[2]).await);
    assert!(!is_locked(&pool, &storage, student, earlier_chapter).await);

    progress::advance_chapter_progress(&pool, student, chapters[0], current)
        .await
        .unwrap();
    assert!(!is_locked(&pool, &storage, student, chapters[1]).await);
    assert!(is_locked(&pool, &storage, student, chapters[2]).await);

    let open = content::chapter_file_url(&pool, &storage, student, chapters[1], Some(current), false, TTL)
        .await
        .unwrap();
    assert!(open.url.is_some());

    // Admins skip the gate
    let admin = content::chapter_file_url(&pool, &storage, student, chapters[2], None, true, TTL)
        .await
        .unwrap();
    assert!(!admin.locked);
    assert!(admin.url.is_some());

    // A topic filter that does not own the chapter finds nothing
    let err = content::chapter_file_url(&pool, &storage, student, chapters[1], Some(earlier), false, TTL)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn later_topics_stay_locked() {
    let pool = test_pool().await;
    let storage = MemoryStorage::new();
    let student = seed_student(&pool).await;
    let a = seed_topic(&pool).await;
    let b = seed_topic(&pool).await;
    let (current, later) = (a.min(b), a.max(b));

    let later_chapter = content::create_chapter(&pool, &storage, chapter_form(later, "1", Some(pdf())))
        .await
        .unwrap()
        .chapter
        .id;
    place_cursor(&pool, student, current).await;

    let response = content::chapter_file_url(&pool, &storage, student, later_chapter, None, false, TTL)
        .await
        .unwrap();
    assert!(response.locked);
    assert!(response.url.is_none());
}
