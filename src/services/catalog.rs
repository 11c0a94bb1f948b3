// src/services/catalog.rs

use std::collections::{HashMap, HashSet};

use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use crate::{
    error::AppError,
    models::{
        attempt::QuizAttempt,
        quiz::{
            CreateQuizRequest, EditQuizRequest, MultipleChoiceOption, ObjectiveQuestion,
            QuestionInput, QuestionType, QuestionView, Quiz, QuizView, TopicQuizzes,
            check_question_options,
        },
        topic::Topic,
    },
    services::begin_workflow,
};

const DEFAULT_QUIZ_TYPE: &str = "objective";

/// Option texts from `wanted` the question does not have yet, first occurrence kept.
fn missing_options(existing: &[String], wanted: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = existing.iter().map(String::as_str).collect();
    wanted
        .iter()
        .filter(|text| seen.insert(text.as_str()))
        .cloned()
        .collect()
}

fn check_all_options<'a>(
    questions: impl IntoIterator<Item = &'a QuestionInput>,
) -> Result<(), AppError> {
    for question in questions {
        check_question_options(question).map_err(AppError::BadRequest)?;
    }
    Ok(())
}

async fn insert_options(
    conn: &mut PgConnection,
    question_id: i64,
    texts: &[String],
) -> Result<(), AppError> {
    if texts.is_empty() {
        return Ok(());
    }

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO multiple_choice_options (question_id, option_text) ");
    builder.push_values(texts, |mut row, text| {
        row.push_bind(question_id).push_bind(text.clone());
    });
    builder.build().execute(conn).await?;
    Ok(())
}

async fn ensure_quiz_parent(
    conn: &mut PgConnection,
    topic_id: i64,
    chapter_id: Option<i64>,
) -> Result<(), AppError> {
    let topic_exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM topics WHERE id = $1)")
        .bind(topic_id)
        .fetch_one(&mut *conn)
        .await?;
    if !topic_exists {
        return Err(AppError::topic_not_found());
    }

    if let Some(chapter_id) = chapter_id {
        let chapter_ok: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM chapters WHERE id = $1 AND topic_id = $2)",
        )
        .bind(chapter_id)
        .bind(topic_id)
        .fetch_one(&mut *conn)
        .await?;
        if !chapter_ok {
            return Err(AppError::NotFound("Chapter not found".to_string()));
        }
    }

    Ok(())
}

/// Inserts a quiz with its questions and options.
///
/// Each question insert returns its id, which is paired with that question's
/// options by position in the request.
pub async fn create_quiz(pool: &PgPool, req: &CreateQuizRequest) -> Result<i64, AppError> {
    check_all_options(&req.questions)?;

    let mut tx = pool.begin().await?;

    ensure_quiz_parent(&mut *tx, req.topic_id, req.chapter_id).await?;

    let quiz_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO quizzes (topic_id, chapter_id, title, quiz_type, max_attempts)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(req.topic_id)
    .bind(req.chapter_id)
    .bind(&req.title)
    .bind(req.quiz_type.as_deref().unwrap_or(DEFAULT_QUIZ_TYPE))
    .bind(req.max_attempts)
    .fetch_one(&mut *tx)
    .await?;

    for question in &req.questions {
        let question_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO objective_questions (quiz_id, question, question_type, correct_answer)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(quiz_id)
        .bind(&question.question)
        .bind(&question.question_type)
        .bind(&question.correct_answer)
        .fetch_one(&mut *tx)
        .await?;

        if QuestionType::parse(&question.question_type) == Some(QuestionType::MultipleChoice) {
            insert_options(&mut *tx, question_id, &missing_options(&[], &question.options)).await?;
        }
    }

    tx.commit().await?;

    tracing::info!(
        quiz_id,
        topic_id = req.topic_id,
        questions = req.questions.len(),
        "Quiz created"
    );
    Ok(quiz_id)
}

/// Updates a quiz in place. Known questions are updated, new ones inserted.
/// Multiple-choice questions gain the option texts they lack; questions that
/// are no longer multiple choice lose their options.
pub async fn edit_quiz(pool: &PgPool, req: &EditQuizRequest) -> Result<(), AppError> {
    check_all_options(req.questions.iter().map(|q| &q.body))?;

    let mut tx = begin_workflow(pool).await?;

    let updated = sqlx::query(
        r#"
        UPDATE quizzes
        SET title = $1, quiz_type = COALESCE($2, quiz_type), max_attempts = $3
        WHERE id = $4
        "#,
    )
    .bind(&req.title)
    .bind(req.quiz_type.as_deref())
    .bind(req.max_attempts)
    .bind(req.quiz_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Quiz not found".to_string()));
    }

    for edit in &req.questions {
        let question = &edit.body;

        let question_id = match edit.id {
            Some(id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE objective_questions
                    SET question = $1, question_type = $2, correct_answer = $3
                    WHERE id = $4 AND quiz_id = $5
                    "#,
                )
                .bind(&question.question)
                .bind(&question.question_type)
                .bind(&question.correct_answer)
                .bind(id)
                .bind(req.quiz_id)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(AppError::NotFound(format!(
                        "Question {} not found in quiz {}",
                        id, req.quiz_id
                    )));
                }
                id
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO objective_questions (quiz_id, question, question_type, correct_answer)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id
                    "#,
                )
                .bind(req.quiz_id)
                .bind(&question.question)
                .bind(&question.question_type)
                .bind(&question.correct_answer)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        if QuestionType::parse(&question.question_type) == Some(QuestionType::MultipleChoice) {
            let existing: Vec<String> = sqlx::query_scalar(
                "SELECT option_text FROM multiple_choice_options WHERE question_id = $1",
            )
            .bind(question_id)
            .fetch_all(&mut *tx)
            .await?;

            insert_options(&mut *tx, question_id, &missing_options(&existing, &question.options))
                .await?;
        } else {
            sqlx::query("DELETE FROM multiple_choice_options WHERE question_id = $1")
                .bind(question_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    tracing::info!(quiz_id = req.quiz_id, "Quiz updated");
    Ok(())
}

/// Loaded rows for quiz delivery, grouped by `assemble_topic_quizzes`.
struct CatalogRows {
    topics: Vec<Topic>,
    quizzes: Vec<Quiz>,
    questions: Vec<ObjectiveQuestion>,
    options: Vec<MultipleChoiceOption>,
    attempts: Vec<QuizAttempt>,
}

fn assemble_topic_quizzes(rows: CatalogRows, include_answers: bool) -> Vec<TopicQuizzes> {
    let mut options_by_question: HashMap<i64, Vec<String>> = HashMap::new();
    for option in rows.options {
        options_by_question
            .entry(option.question_id)
            .or_default()
            .push(option.option_text);
    }

    let mut questions_by_quiz: HashMap<i64, Vec<QuestionView>> = HashMap::new();
    for q in rows.questions {
        questions_by_quiz.entry(q.quiz_id).or_default().push(QuestionView {
            id: q.id,
            quiz_id: q.quiz_id,
            options: options_by_question.remove(&q.id).unwrap_or_default(),
            question: q.question,
            question_type: q.question_type,
            correct_answer: include_answers.then_some(q.correct_answer),
        });
    }

    let mut attempts_by_quiz: HashMap<i64, QuizAttempt> =
        rows.attempts.into_iter().map(|a| (a.quiz_id, a)).collect();

    let mut quizzes_by_topic: HashMap<i64, Vec<QuizView>> = HashMap::new();
    for quiz in rows.quizzes {
        let questions = questions_by_quiz.remove(&quiz.id).unwrap_or_default();
        let attempt = attempts_by_quiz.remove(&quiz.id);
        quizzes_by_topic.entry(quiz.topic_id).or_default().push(QuizView {
            quiz,
            attempt,
            questions,
        });
    }

    rows.topics
        .into_iter()
        .map(|topic| TopicQuizzes {
            quizzes: quizzes_by_topic.remove(&topic.id).unwrap_or_default(),
            id: topic.id,
            title: topic.title,
            description: topic.description,
        })
        .collect()
}

/// Topics with their quizzes, questions and option texts.
///
/// `student_id` attaches the caller's attempt to each quiz. Correct answers are
/// only included for admin views. `topic_id` narrows the result to one topic.
pub async fn list_topic_quizzes(
    pool: &PgPool,
    student_id: Option<i64>,
    topic_id: Option<i64>,
    include_answers: bool,
) -> Result<Vec<TopicQuizzes>, AppError> {
    let topics = sqlx::query_as::<_, Topic>(
        r#"
        SELECT id, title, description, created_at
        FROM topics
        WHERE $1::BIGINT IS NULL OR id = $1
        ORDER BY id
        "#,
    )
    .bind(topic_id)
    .fetch_all(pool)
    .await?;

    if topic_id.is_some() && topics.is_empty() {
        return Err(AppError::topic_not_found());
    }

    let quizzes = sqlx::query_as::<_, Quiz>(
        r#"
        SELECT id, topic_id, chapter_id, title, quiz_type, max_attempts, created_at
        FROM quizzes
        WHERE $1::BIGINT IS NULL OR topic_id = $1
        ORDER BY id
        "#,
    )
    .bind(topic_id)
    .fetch_all(pool)
    .await?;

    let questions = sqlx::query_as::<_, ObjectiveQuestion>(
        r#"
        SELECT q.id, q.quiz_id, q.question, q.question_type, q.correct_answer
        FROM objective_questions q
        JOIN quizzes z ON z.id = q.quiz_id
        WHERE $1::BIGINT IS NULL OR z.topic_id = $1
        ORDER BY q.id
        "#,
    )
    .bind(topic_id)
    .fetch_all(pool)
    .await?;

    let options = sqlx::query_as::<_, MultipleChoiceOption>(
        r#"
        SELECT o.id, o.question_id, o.option_text
        FROM multiple_choice_options o
        JOIN objective_questions q ON q.id = o.question_id
        JOIN quizzes z ON z.id = q.quiz_id
        WHERE $1::BIGINT IS NULL OR z.topic_id = $1
        ORDER BY o.id
        "#,
    )
    .bind(topic_id)
    .fetch_all(pool)
    .await?;

    let attempts = match student_id {
        Some(student_id) => {
            sqlx::query_as::<_, QuizAttempt>(
                r#"
                SELECT id, quiz_id, student_id, start_time, completed_at, score, time_taken_ms, attempt_count
                FROM quiz_attempts
                WHERE student_id = $1
                "#,
            )
            .bind(student_id)
            .fetch_all(pool)
            .await?
        }
        None => Vec::new(),
    };

    Ok(assemble_topic_quizzes(
        CatalogRows {
            topics,
            quizzes,
            questions,
            options,
            attempts,
        },
        include_answers,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn rows() -> CatalogRows {
        CatalogRows {
            topics: vec![
                Topic {
                    id: 1,
                    title: "Databases".to_string(),
                    description: "Intro".to_string(),
                    created_at: None,
                },
                Topic {
                    id: 2,
                    title: "SQL".to_string(),
                    description: "Queries".to_string(),
                    created_at: None,
                },
            ],
            quizzes: vec![Quiz {
                id: 7,
                topic_id: 1,
                chapter_id: None,
                title: "Basics".to_string(),
                quiz_type: "objective".to_string(),
                max_attempts: 3,
                created_at: None,
            }],
            questions: vec![ObjectiveQuestion {
                id: 70,
                quiz_id: 7,
                question: "2+2=?".to_string(),
                question_type: "multiple_choice".to_string(),
                correct_answer: "B) 4".to_string(),
            }],
            options: vec![
                MultipleChoiceOption {
                    id: 700,
                    question_id: 70,
                    option_text: "A) 3".to_string(),
                },
                MultipleChoiceOption {
                    id: 701,
                    question_id: 70,
                    option_text: "B) 4".to_string(),
                },
            ],
            attempts: vec![],
        }
    }

    #[test]
    fn test_missing_options_appends_only_new_text() {
        let existing = strings(&["A) 3", "B) 4"]);
        let wanted = strings(&["A) 3", "B) 4", "C) 5", "C) 5"]);
        assert_eq!(missing_options(&existing, &wanted), strings(&["C) 5"]));
    }

    #[test]
    fn test_missing_options_keeps_request_order() {
        let wanted = strings(&["B) x", "A) y"]);
        assert_eq!(missing_options(&[], &wanted), wanted);
    }

    #[test]
    fn test_assemble_hides_answers_for_students() {
        let topics = assemble_topic_quizzes(rows(), false);
        assert_eq!(topics.len(), 2);

        let quiz = &topics[0].quizzes[0];
        assert_eq!(quiz.questions[0].options, strings(&["A) 3", "B) 4"]));
        assert!(quiz.questions[0].correct_answer.is_none());
        assert!(topics[1].quizzes.is_empty());
    }

    #[test]
    fn test_assemble_includes_answers_for_admins() {
        let topics = assemble_topic_quizzes(rows(), true);
        assert_eq!(
            topics[0].quizzes[0].questions[0].correct_answer.as_deref(),
            Some("B) 4")
        );
    }

    #[test]
    fn test_assemble_attaches_attempt() {
        let mut rows = rows();
        rows.attempts.push(QuizAttempt {
            id: 1,
            quiz_id: 7,
            student_id: 5,
            start_time: None,
            completed_at: None,
            score: None,
            time_taken_ms: None,
            attempt_count: 0,
        });
        let topics = assemble_topic_quizzes(rows, false);
        assert_eq!(topics[0].quizzes[0].attempt.as_ref().map(|a| a.student_id), Some(5));
    }
}
