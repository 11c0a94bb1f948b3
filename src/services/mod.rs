pub mod attempt;
pub mod catalog;
pub mod content;
pub mod mailer;
pub mod otp;
pub mod progress;
pub mod session;
pub mod storage;

use sqlx::{PgPool, Postgres, Transaction};

use crate::{config::WORKFLOW_STATEMENT_TIMEOUT, error::AppError};

/// Opens a transaction for a multi-step read-modify-write workflow:
/// repeatable-read isolation and a bounded statement timeout.
pub async fn begin_workflow(pool: &PgPool) -> Result<Transaction<'static, Postgres>, AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;

    sqlx::query(&format!(
        "SET LOCAL statement_timeout = '{}'",
        WORKFLOW_STATEMENT_TIMEOUT
    ))
    .execute(&mut *tx)
    .await?;

    Ok(tx)
}
