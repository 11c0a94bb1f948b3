// src/services/progress.rs

use sqlx::{PgConnection, PgPool};

use crate::{
    error::AppError,
    models::progress::{CompletedChapter, CompletedQuiz, ProgressOverview, UserProgress},
    services::begin_workflow,
};

const PROGRESS_COLUMNS: &str =
    "student_id, curr_chap_id, curr_topic_id, curr_quiz_id, completed_lessons, completed_quizzes";

/// A student's position in the curriculum: a topic id and a 1-based chapter
/// position inside that topic, counting chapters in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub chapter: i64,
    pub topic_id: i64,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            chapter: 1,
            topic_id: 1,
        }
    }
}

impl Cursor {
    /// Whether the chapter at `position` of `topic_id` is open to the student.
    pub fn unlocks(&self, topic_id: i64, position: i64) -> bool {
        topic_id < self.topic_id || (topic_id == self.topic_id && position <= self.chapter)
    }
}

/// Cursor after the chapter at `position` of `topic_id` is completed.
///
/// Completing a whole topic moves to the first chapter of the next topic.
/// Inside the current topic the cursor moves past the completed chapter.
/// The cursor never moves back to an earlier topic or chapter.
pub fn next_cursor(
    current: Cursor,
    topic_id: i64,
    position: i64,
    completed_in_topic: i64,
    total_in_topic: i64,
) -> Cursor {
    if topic_id < current.topic_id {
        return current;
    }

    if total_in_topic > 0 && completed_in_topic >= total_in_topic {
        return Cursor {
            chapter: 1,
            topic_id: topic_id + 1,
        };
    }

    if topic_id == current.topic_id {
        let following = (position + 1).min(total_in_topic);
        return Cursor {
            chapter: current.chapter.max(following),
            topic_id,
        };
    }

    current
}

async fn load_progress(
    conn: &mut PgConnection,
    student_id: i64,
) -> Result<Option<UserProgress>, AppError> {
    let progress = sqlx::query_as::<_, UserProgress>(&format!(
        "SELECT {} FROM user_progress WHERE student_id = $1",
        PROGRESS_COLUMNS
    ))
    .bind(student_id)
    .fetch_optional(conn)
    .await?;

    Ok(progress)
}

/// Returns the student's progress row, creating it with default cursors on first access.
pub async fn get_or_create_progress(
    pool: &PgPool,
    student_id: i64,
) -> Result<UserProgress, AppError> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        "INSERT INTO user_progress (student_id) VALUES ($1) ON CONFLICT (student_id) DO NOTHING",
    )
    .bind(student_id)
    .execute(&mut *conn)
    .await?;

    load_progress(&mut *conn, student_id)
        .await?
        .ok_or_else(|| AppError::internal("Progress row missing after upsert", student_id))
}

pub async fn progress_overview(
    pool: &PgPool,
    student_id: i64,
) -> Result<ProgressOverview, AppError> {
    let progress = get_or_create_progress(pool, student_id).await?;

    let completed_chapters = sqlx::query_as::<_, CompletedChapter>(
        r#"
        SELECT chapter_id, topic_id, status, completed_at
        FROM completed_chapters
        WHERE student_id = $1
        ORDER BY completed_at
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let completed_quizzes = sqlx::query_as::<_, CompletedQuiz>(
        r#"
        SELECT quiz_id, topic_id, completed_at
        FROM completed_quizzes
        WHERE student_id = $1
        ORDER BY completed_at
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(ProgressOverview {
        progress,
        completed_chapters,
        completed_quizzes,
    })
}

/// Marks a chapter complete, recomputes the lesson counter from the ledger
/// and rolls the cursor over to the next topic when the topic is finished.
pub async fn advance_chapter_progress(
    pool: &PgPool,
    student_id: i64,
    chapter_id: i64,
    topic_id: i64,
) -> Result<Cursor, AppError> {
    advance(pool, student_id, chapter_id, topic_id)
        .await
        .map_err(|e| {
            if let AppError::InternalServerError(detail) = &e {
                tracing::error!(student_id, chapter_id, topic_id, "Progress update failed: {}", detail);
            }
            progress_failure(e)
        })
}

/// Storage failures surface as "Error updating progress"; client errors pass through.
fn progress_failure(err: AppError) -> AppError {
    match err {
        AppError::InternalServerError(_) => {
            AppError::WorkflowFailed("Error updating progress".to_string())
        }
        other => other,
    }
}

async fn advance(
    pool: &PgPool,
    student_id: i64,
    chapter_id: i64,
    topic_id: i64,
) -> Result<Cursor, AppError> {
    let mut tx = begin_workflow(pool).await?;

    let total_in_topic: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chapters WHERE topic_id = $1")
        .bind(topic_id)
        .fetch_one(&mut *tx)
        .await?;

    if total_in_topic == 0 {
        return Err(AppError::topic_not_found());
    }

    let position = chapter_position(&mut *tx, chapter_id)
        .await?
        .filter(|(owner, _)| *owner == topic_id)
        .map(|(_, position)| position)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Chapter {} not found in topic {}",
                chapter_id, topic_id
            ))
        })?;

    // Repeating a completion leaves the ledger unchanged.
    sqlx::query(
        r#"
        INSERT INTO completed_chapters (student_id, chapter_id, topic_id, status)
        VALUES ($1, $2, $3, 'completed')
        ON CONFLICT (student_id, chapter_id) DO UPDATE SET status = 'completed'
        "#,
    )
    .bind(student_id)
    .bind(chapter_id)
    .bind(topic_id)
    .execute(&mut *tx)
    .await?;

    let completed_in_topic: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM completed_chapters
        WHERE student_id = $1 AND topic_id = $2 AND status = 'completed'
        "#,
    )
    .bind(student_id)
    .bind(topic_id)
    .fetch_one(&mut *tx)
    .await?;

    let current = load_progress(&mut *tx, student_id)
        .await?
        .map(|p| Cursor {
            chapter: p.curr_chap_id,
            topic_id: p.curr_topic_id,
        })
        .unwrap_or_default();

    let next = next_cursor(current, topic_id, position, completed_in_topic, total_in_topic);

    // Counter is a fresh count, never an increment.
    let cursor = sqlx::query_as::<_, (i64, i64)>(
        r#"
        INSERT INTO user_progress (student_id, curr_chap_id, curr_topic_id, completed_lessons)
        VALUES ($1, $2, $3,
            (SELECT COUNT(*) FROM completed_chapters WHERE student_id = $1 AND status = 'completed')::INT)
        ON CONFLICT (student_id) DO UPDATE
        SET curr_chap_id = EXCLUDED.curr_chap_id,
            curr_topic_id = EXCLUDED.curr_topic_id,
            completed_lessons = EXCLUDED.completed_lessons
        RETURNING curr_chap_id, curr_topic_id
        "#,
    )
    .bind(student_id)
    .bind(next.chapter)
    .bind(next.topic_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    if next.topic_id != current.topic_id {
        tracing::info!(
            student_id,
            from_topic = current.topic_id,
            to_topic = next.topic_id,
            "Topic completed, cursor rolled over"
        );
    }

    Ok(Cursor {
        chapter: cursor.0,
        topic_id: cursor.1,
    })
}

/// Owning topic and 1-based position of a chapter within it.
pub(crate) async fn chapter_position(
    conn: &mut PgConnection,
    chapter_id: i64,
) -> Result<Option<(i64, i64)>, AppError> {
    let row = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT c.topic_id,
               (SELECT COUNT(*) FROM chapters o WHERE o.topic_id = c.topic_id AND o.id <= c.id)
        FROM chapters c
        WHERE c.id = $1
        "#,
    )
    .bind(chapter_id)
    .fetch_optional(conn)
    .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollover_when_topic_complete() {
        let current = Cursor { chapter: 3, topic_id: 2 };
        assert_eq!(
            next_cursor(current, 2, 3, 3, 3),
            Cursor { chapter: 1, topic_id: 3 }
        );
    }

    #[test]
    fn test_cursor_moves_past_completed_chapter() {
        let current = Cursor { chapter: 1, topic_id: 2 };
        assert_eq!(next_cursor(current, 2, 1, 1, 3), Cursor { chapter: 2, topic_id: 2 });
    }

    #[test]
    fn test_cursor_stays_on_last_chapter_until_topic_done() {
        // Last chapter done, an earlier one still open
        let current = Cursor { chapter: 2, topic_id: 2 };
        assert_eq!(next_cursor(current, 2, 3, 2, 3), Cursor { chapter: 3, topic_id: 2 });
    }

    #[test]
    fn test_repeating_an_earlier_chapter_keeps_cursor() {
        let current = Cursor { chapter: 3, topic_id: 2 };
        assert_eq!(next_cursor(current, 2, 1, 2, 4), current);
    }

    #[test]
    fn test_finished_topic_never_pulls_cursor_back() {
        // Topic 1 was finished long ago; the student is now in topic 3.
        let current = Cursor { chapter: 2, topic_id: 3 };
        assert_eq!(next_cursor(current, 1, 1, 4, 4), current);
        assert_eq!(next_cursor(current, 2, 5, 5, 5), current);
    }

    #[test]
    fn test_empty_topic_never_rolls_over() {
        assert_eq!(next_cursor(Cursor::default(), 1, 1, 0, 0), Cursor { chapter: 1, topic_id: 1 });
    }

    #[test]
    fn test_unlocks() {
        let cursor = Cursor { chapter: 2, topic_id: 3 };
        assert!(cursor.unlocks(1, 9));
        assert!(cursor.unlocks(3, 1));
        assert!(cursor.unlocks(3, 2));
        assert!(!cursor.unlocks(3, 3));
        assert!(!cursor.unlocks(4, 1));
    }

    #[test]
    fn test_storage_failure_is_reported_as_progress_error() {
        let err = progress_failure(AppError::InternalServerError("deadlock detected".into()));
        assert!(matches!(err, AppError::WorkflowFailed(ref msg) if msg == "Error updating progress"));

        let err = progress_failure(AppError::topic_not_found());
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_default_cursor() {
        assert_eq!(Cursor::default(), Cursor { chapter: 1, topic_id: 1 });
    }
}
