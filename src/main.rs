// src/main.rs

use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use lcms_backend::config::Config;
use lcms_backend::routes;
use lcms_backend::services::content::spawn_deletion_reconciler;
use lcms_backend::services::mailer::{LogMailer, Mailer, SmtpMailer};
use lcms_backend::services::storage::{FileStorage, MemoryStorage, S3Storage};
use lcms_backend::state::AppState;
use lcms_backend::utils::hash::hash_password;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenv().ok();

    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    // Database pool with retry
    let mut retry_count = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    panic!("Failed to connect to database after 5 retries: {}", e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    };
    tracing::info!("Database connected");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations applied");

    if let Err(e) = seed_admin_user(&pool, &config).await {
        tracing::error!("Failed to seed admin user: {:?}", e);
    }

    let storage: Arc<dyn FileStorage> = match &config.s3 {
        Some(settings) => {
            tracing::info!(bucket = %settings.bucket, "Using S3 object storage");
            Arc::new(S3Storage::from_settings(settings).await)
        }
        None => {
            tracing::warn!("S3_BUCKET not set, chapter files are kept in memory");
            Arc::new(MemoryStorage::new())
        }
    };

    let mailer: Arc<dyn Mailer> = match config.smtp.as_ref().map(SmtpMailer::from_settings) {
        Some(Ok(mailer)) => Arc::new(mailer),
        Some(Err(e)) => {
            tracing::error!("SMTP transport unavailable, logging mail instead: {:?}", e);
            Arc::new(LogMailer)
        }
        None => {
            tracing::warn!("SMTP_HOST not set, OTP mail goes to the log");
            Arc::new(LogMailer)
        }
    };

    let _reconciler = spawn_deletion_reconciler(pool.clone(), storage.clone());

    let state = AppState {
        pool,
        config: config.clone(),
        storage,
        mailer,
    };
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listen address");
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

/// Creates the admin account from ADMIN_EMAIL / ADMIN_PASSWORD when it does not exist yet.
async fn seed_admin_user(pool: &PgPool, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(());
    };

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    if exists.is_none() {
        tracing::info!("Seeding admin user: {}", email);
        let hashed_password = hash_password(password)?;

        sqlx::query(
            "INSERT INTO users (username, email, password, role) VALUES ('admin', $1, $2, 'admin')",
        )
        .bind(email)
        .bind(hashed_password)
        .execute(pool)
        .await?;
    }
    Ok(())
}
