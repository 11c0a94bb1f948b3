// src/services/attempt.rs

use std::collections::HashMap;

use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::{
    error::AppError,
    models::{
        attempt::QuizAttempt,
        quiz::{MultipleChoiceOption, ObjectiveQuestion, QuestionType},
    },
    services::begin_workflow,
};

const ATTEMPT_COLUMNS: &str =
    "id, quiz_id, student_id, start_time, completed_at, score, time_taken_ms, attempt_count";

/// Result of a graded submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradedSubmission {
    pub score: i32,
    pub attempt_count: i32,
    pub attempt_number: i32,
}

/// A multiple-choice answer after option resolution. `option_id` is `None`
/// when the submitted text is not an option of that question.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChoiceAnswer {
    question_id: i64,
    option_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IdentificationAnswer {
    question_id: i64,
    text: String,
    is_correct: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PartitionedAnswers {
    choices: Vec<ChoiceAnswer>,
    identifications: Vec<IdentificationAnswer>,
    /// Question ids that do not belong to the quiz.
    ignored: Vec<i64>,
}

#[derive(sqlx::FromRow)]
struct QuizOwner {
    topic_id: i64,
    max_attempts: i32,
}

/// Case-insensitive comparison used for free-text answers.
fn identification_matches(submitted: &str, correct: &str) -> bool {
    submitted.to_lowercase() == correct.to_lowercase()
}

/// Finds the option with this exact text among the options of `question_id` only.
fn resolve_option(
    options_by_question: &HashMap<i64, Vec<MultipleChoiceOption>>,
    question_id: i64,
    text: &str,
) -> Option<i64> {
    options_by_question
        .get(&question_id)?
        .iter()
        .find(|option| option.option_text == text)
        .map(|option| option.id)
}

/// Splits submitted answers by question type. Output is ordered by question id.
fn partition_answers(
    answers: &HashMap<i64, String>,
    questions: &[ObjectiveQuestion],
    options: &[MultipleChoiceOption],
) -> PartitionedAnswers {
    let by_id: HashMap<i64, &ObjectiveQuestion> = questions.iter().map(|q| (q.id, q)).collect();

    let mut options_by_question: HashMap<i64, Vec<MultipleChoiceOption>> = HashMap::new();
    for option in options {
        options_by_question
            .entry(option.question_id)
            .or_default()
            .push(option.clone());
    }

    let mut submitted: Vec<(&i64, &String)> = answers.iter().collect();
    submitted.sort_by_key(|(id, _)| **id);

    let mut out = PartitionedAnswers::default();
    for (question_id, text) in submitted {
        let Some(question) = by_id.get(question_id) else {
            out.ignored.push(*question_id);
            continue;
        };

        match QuestionType::parse(&question.question_type) {
            Some(QuestionType::MultipleChoice) => out.choices.push(ChoiceAnswer {
                question_id: *question_id,
                option_id: resolve_option(&options_by_question, *question_id, text),
            }),
            Some(QuestionType::Identification) => out.identifications.push(IdentificationAnswer {
                question_id: *question_id,
                text: text.clone(),
                is_correct: identification_matches(text, &question.correct_answer),
            }),
            None => out.ignored.push(*question_id),
        }
    }

    out
}

/// Arms an attempt for (student, quiz): creates the row on first start,
/// otherwise only moves `start_time`. Score and count are left alone.
pub async fn start_attempt(
    pool: &PgPool,
    student_id: i64,
    quiz_id: i64,
) -> Result<QuizAttempt, AppError> {
    let mut tx = begin_workflow(pool).await?;

    let quiz = sqlx::query_as::<_, QuizOwner>(
        "SELECT topic_id, max_attempts FROM quizzes WHERE id = $1",
    )
    .bind(quiz_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))?;

    let existing: Option<i32> = sqlx::query_scalar(
        "SELECT attempt_count FROM quiz_attempts WHERE quiz_id = $1 AND student_id = $2 FOR UPDATE",
    )
    .bind(quiz_id)
    .bind(student_id)
    .fetch_optional(&mut *tx)
    .await?;

    if existing.is_some_and(|count| count >= quiz.max_attempts) {
        tracing::info!(student_id, quiz_id, "Start rejected, attempts exhausted");
        return Err(AppError::max_attempts_reached());
    }

    let attempt = sqlx::query_as::<_, QuizAttempt>(&format!(
        r#"
        INSERT INTO quiz_attempts (quiz_id, student_id, start_time, attempt_count)
        VALUES ($1, $2, NOW(), 0)
        ON CONFLICT (quiz_id, student_id) DO UPDATE SET start_time = NOW()
        RETURNING {}
        "#,
        ATTEMPT_COLUMNS
    ))
    .bind(quiz_id)
    .bind(student_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        student_id,
        quiz_id,
        topic_id = quiz.topic_id,
        attempt_count = attempt.attempt_count,
        "Quiz attempt started"
    );
    Ok(attempt)
}

/// Records, grades and scores a submission in a single transaction, then
/// updates the completed-quiz ledger and the student's progress row.
///
/// `topic_id`, when given, must own the quiz. Answers naming questions outside
/// the quiz are skipped.
pub async fn submit_attempt(
    pool: &PgPool,
    student_id: i64,
    quiz_id: i64,
    topic_id: Option<i64>,
    answers: &HashMap<i64, String>,
) -> Result<GradedSubmission, AppError> {
    let mut tx = begin_workflow(pool).await?;

    let quiz = sqlx::query_as::<_, QuizOwner>(
        "SELECT topic_id, max_attempts FROM quizzes WHERE id = $1",
    )
    .bind(quiz_id)
    .fetch_optional(&mut *tx)
    .await?
    .filter(|quiz| topic_id.is_none_or(|t| t == quiz.topic_id))
    .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))?;

    // The attempt must have been started.
    let attempt = sqlx::query_as::<_, QuizAttempt>(&format!(
        r#"
        SELECT {}
        FROM quiz_attempts
        WHERE quiz_id = $1 AND student_id = $2 AND start_time IS NOT NULL
        FOR UPDATE
        "#,
        ATTEMPT_COLUMNS
    ))
    .bind(quiz_id)
    .bind(student_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(AppError::attempt_not_found)?;

    if attempt.attempt_count >= quiz.max_attempts {
        return Err(AppError::max_attempts_reached());
    }

    let attempt_number = attempt.attempt_count + 1;

    // Question types, correct answers and options in bulk.
    let questions = sqlx::query_as::<_, ObjectiveQuestion>(
        "SELECT id, quiz_id, question, question_type, correct_answer FROM objective_questions WHERE quiz_id = $1",
    )
    .bind(quiz_id)
    .fetch_all(&mut *tx)
    .await?;

    let options = sqlx::query_as::<_, MultipleChoiceOption>(
        r#"
        SELECT o.id, o.question_id, o.option_text
        FROM multiple_choice_options o
        JOIN objective_questions q ON q.id = o.question_id
        WHERE q.quiz_id = $1
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&mut *tx)
    .await?;

    let partitioned = partition_answers(answers, &questions, &options);
    if !partitioned.ignored.is_empty() {
        tracing::warn!(
            student_id,
            quiz_id,
            ignored = ?partitioned.ignored,
            "Answers for questions outside the quiz were skipped"
        );
    }

    // Multiple choice: insert, then mark the rows whose option text is the answer key.
    if !partitioned.choices.is_empty() {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO multiple_choice_answers (attempt_id, student_id, question_id, selected_option_id, attempt_number) ",
        );
        builder.push_values(&partitioned.choices, |mut row, answer| {
            row.push_bind(attempt.id)
                .push_bind(student_id)
                .push_bind(answer.question_id)
                .push_bind(answer.option_id)
                .push_bind(attempt_number);
        });
        builder.build().execute(&mut *tx).await?;

        sqlx::query(
            r#"
            UPDATE multiple_choice_answers a
            SET is_correct = TRUE
            FROM multiple_choice_options o
            JOIN objective_questions q ON q.id = o.question_id
            WHERE a.selected_option_id = o.id
              AND a.question_id = q.id
              AND o.option_text = q.correct_answer
              AND a.attempt_id = $1
              AND a.attempt_number = $2
            "#,
        )
        .bind(attempt.id)
        .bind(attempt_number)
        .execute(&mut *tx)
        .await?;
    }

    // Identification: correctness is known at insert time.
    if !partitioned.identifications.is_empty() {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO identification_answers (attempt_id, student_id, question_id, answer_text, is_correct, attempt_number) ",
        );
        builder.push_values(&partitioned.identifications, |mut row, answer| {
            row.push_bind(attempt.id)
                .push_bind(student_id)
                .push_bind(answer.question_id)
                .push_bind(answer.text.clone())
                .push_bind(answer.is_correct)
                .push_bind(attempt_number);
        });
        builder.build().execute(&mut *tx).await?;
    }

    // Score is read back from the answer rows of this attempt number.
    let score: i64 = sqlx::query_scalar(
        r#"
        SELECT
            (SELECT COUNT(*) FROM multiple_choice_answers
             WHERE attempt_id = $1 AND attempt_number = $2 AND is_correct)
          + (SELECT COUNT(*) FROM identification_answers
             WHERE attempt_id = $1 AND attempt_number = $2 AND is_correct)
        "#,
    )
    .bind(attempt.id)
    .bind(attempt_number)
    .fetch_one(&mut *tx)
    .await?;
    let score = i32::try_from(score).map_err(|e| AppError::internal("Score overflow", e))?;

    // Finish the attempt; the count only moves on a successful submission.
    let attempt_count: i32 = sqlx::query_scalar(
        r#"
        UPDATE quiz_attempts
        SET score = $1,
            completed_at = NOW(),
            time_taken_ms = (EXTRACT(EPOCH FROM (NOW() - start_time)) * 1000)::BIGINT,
            attempt_count = attempt_count + 1
        WHERE id = $2
        RETURNING attempt_count
        "#,
    )
    .bind(score)
    .bind(attempt.id)
    .fetch_one(&mut *tx)
    .await?;

    // Resubmitting keeps a single ledger row and refreshes its timestamp.
    sqlx::query(
        r#"
        INSERT INTO completed_quizzes (student_id, quiz_id, topic_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (student_id, quiz_id) DO UPDATE SET completed_at = NOW()
        "#,
    )
    .bind(student_id)
    .bind(quiz_id)
    .bind(quiz.topic_id)
    .execute(&mut *tx)
    .await?;

    // Counter is recomputed from the ledger.
    sqlx::query(
        r#"
        INSERT INTO user_progress (student_id, curr_quiz_id, completed_quizzes)
        VALUES ($1, $2, (SELECT COUNT(*) FROM completed_quizzes WHERE student_id = $1)::INT)
        ON CONFLICT (student_id) DO UPDATE
        SET curr_quiz_id = EXCLUDED.curr_quiz_id,
            completed_quizzes = EXCLUDED.completed_quizzes
        "#,
    )
    .bind(student_id)
    .bind(quiz_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        student_id,
        quiz_id,
        attempt_number,
        score,
        "Quiz attempt graded"
    );

    Ok(GradedSubmission {
        score,
        attempt_count,
        attempt_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: i64, kind: &str, correct: &str) -> ObjectiveQuestion {
        ObjectiveQuestion {
            id,
            quiz_id: 1,
            question: format!("Question {}", id),
            question_type: kind.to_string(),
            correct_answer: correct.to_string(),
        }
    }

    fn option(id: i64, question_id: i64, text: &str) -> MultipleChoiceOption {
        MultipleChoiceOption {
            id,
            question_id,
            option_text: text.to_string(),
        }
    }

    fn fixture() -> (Vec<ObjectiveQuestion>, Vec<MultipleChoiceOption>) {
        let questions = vec![
            question(1, "multiple_choice", "B) 4"),
            question(2, "multiple_choice", "A) Paris"),
            question(3, "identification", "Primary Key"),
        ];
        let options = vec![
            option(10, 1, "A) 3"),
            option(11, 1, "B) 4"),
            option(20, 2, "A) Paris"),
            option(21, 2, "B) Rome"),
        ];
        (questions, options)
    }

    #[test]
    fn test_identification_is_case_insensitive() {
        assert!(identification_matches("primary key", "Primary Key"));
        assert!(identification_matches("PRIMARY KEY", "Primary Key"));
        assert!(!identification_matches("primary  key", "Primary Key"));
    }

    #[test]
    fn test_option_resolution_stays_within_question() {
        let (questions, options) = fixture();
        let mut answers = HashMap::new();
        // "A) Paris" is an option of question 2, not question 1.
        answers.insert(1, "A) Paris".to_string());
        answers.insert(2, "A) Paris".to_string());

        let out = partition_answers(&answers, &questions, &options);
        assert_eq!(
            out.choices,
            vec![
                ChoiceAnswer { question_id: 1, option_id: None },
                ChoiceAnswer { question_id: 2, option_id: Some(20) },
            ]
        );
    }

    #[test]
    fn test_partition_by_type_and_ignore_foreign_questions() {
        let (questions, options) = fixture();
        let mut answers = HashMap::new();
        answers.insert(1, "B) 4".to_string());
        answers.insert(3, "primary key".to_string());
        answers.insert(99, "A) 3".to_string());

        let out = partition_answers(&answers, &questions, &options);
        assert_eq!(out.choices, vec![ChoiceAnswer { question_id: 1, option_id: Some(11) }]);
        assert_eq!(
            out.identifications,
            vec![IdentificationAnswer {
                question_id: 3,
                text: "primary key".to_string(),
                is_correct: true,
            }]
        );
        assert_eq!(out.ignored, vec![99]);
    }

    #[test]
    fn test_empty_answers() {
        let (questions, options) = fixture();
        let out = partition_answers(&HashMap::new(), &questions, &options);
        assert_eq!(out, PartitionedAnswers::default());
    }

    #[test]
    fn test_unknown_option_text_resolves_to_none() {
        let (questions, options) = fixture();
        let mut answers = HashMap::new();
        answers.insert(1, "Z) 42".to_string());

        let out = partition_answers(&answers, &questions, &options);
        assert_eq!(out.choices, vec![ChoiceAnswer { question_id: 1, option_id: None }]);
    }
}
