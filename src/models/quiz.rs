// src/models/quiz.rs

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::attempt::QuizAttempt;

/// Options are labelled "A) ...", "B) ..." and so on.
static OPTION_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]\)\s").expect("valid option label pattern"));

pub const MULTIPLE_CHOICE: &str = "multiple_choice";
pub const IDENTIFICATION: &str = "identification";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionType {
    MultipleChoice,
    Identification,
}

impl QuestionType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            MULTIPLE_CHOICE => Some(QuestionType::MultipleChoice),
            IDENTIFICATION => Some(QuestionType::Identification),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => MULTIPLE_CHOICE,
            QuestionType::Identification => IDENTIFICATION,
        }
    }
}

/// Represents the 'quizzes' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,
    pub topic_id: i64,
    pub chapter_id: Option<i64>,
    pub title: String,
    pub quiz_type: String,
    pub max_attempts: i32,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'objective_questions' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ObjectiveQuestion {
    pub id: i64,
    pub quiz_id: i64,
    pub question: String,
    /// 'multiple_choice' or 'identification'.
    pub question_type: String,
    pub correct_answer: String,
}

/// Represents the 'multiple_choice_options' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MultipleChoiceOption {
    pub id: i64,
    pub question_id: i64,
    pub option_text: String,
}

/// Question as delivered to a client. `correct_answer` is only filled for admins.
#[derive(Debug, Serialize)]
pub struct QuestionView {
    pub id: i64,
    pub quiz_id: i64,
    pub question: String,
    pub question_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    pub options: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct QuizView {
    #[serde(flatten)]
    pub quiz: Quiz,
    /// The caller's attempt, absent for admin assessments or when never started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<QuizAttempt>,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Serialize)]
pub struct TopicQuizzes {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub quizzes: Vec<QuizView>,
}

/// DTO for one question of a new quiz.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuestionInput {
    #[validate(length(min = 1, max = 2000, message = "Please enter a question text."))]
    pub question: String,
    #[validate(custom(function = validate_question_type))]
    pub question_type: String,
    #[validate(length(min = 1, max = 500, message = "Please enter a correct answer."))]
    pub correct_answer: String,
    #[serde(default)]
    #[validate(custom(function = validate_options))]
    pub options: Vec<String>,
}

/// DTO for creating a quiz with its questions and options.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[validate(range(min = 1))]
    pub topic_id: i64,
    pub chapter_id: Option<i64>,
    #[validate(length(min = 1, max = 200, message = "Please enter a quiz title."))]
    pub title: String,
    pub quiz_type: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: i32,
    #[validate(length(min = 1, message = "A quiz needs at least one question."), nested)]
    pub questions: Vec<QuestionInput>,
}

/// DTO for one question of an edited quiz. Questions without an id are new.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EditQuestionInput {
    pub id: Option<i64>,
    #[validate(nested)]
    #[serde(flatten)]
    pub body: QuestionInput,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EditQuizRequest {
    pub quiz_id: i64,
    #[validate(length(min = 1, max = 200, message = "Please enter a quiz title."))]
    pub title: String,
    pub quiz_type: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: i32,
    #[validate(length(min = 1, message = "A quiz needs at least one question."), nested)]
    pub questions: Vec<EditQuestionInput>,
}

fn validate_question_type(value: &str) -> Result<(), validator::ValidationError> {
    if QuestionType::parse(value).is_none() {
        return Err(validator::ValidationError::new("invalid_question_type"));
    }
    Ok(())
}

fn validate_options(options: &[String]) -> Result<(), validator::ValidationError> {
    for opt in options {
        if opt.len() > 500 {
            return Err(validator::ValidationError::new("option_too_long"));
        }
        if !OPTION_LABEL_RE.is_match(opt) {
            return Err(validator::ValidationError::new("option_label"));
        }
    }
    Ok(())
}

/// Cross-field rule the derive cannot express: multiple-choice questions need options.
pub fn check_question_options(question: &QuestionInput) -> Result<(), String> {
    if QuestionType::parse(&question.question_type) == Some(QuestionType::MultipleChoice)
        && question.options.is_empty()
    {
        return Err(format!(
            "Multiple choice question '{}' has no options",
            question.question
        ));
    }
    Ok(())
}
