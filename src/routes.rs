// src/routes.rs

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    config::MAX_UPLOAD_BYTES,
    handlers::{admin, auth, chapter, quiz, topic, user},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    // Cookies travel cross-origin, so origins are listed explicitly.
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Assembles the main application router.
///
/// * `/auth`, `/topics` and the password-reset part of `/user` are public.
/// * Everything else requires a valid session; `/admin` also requires the admin role.
/// * Global layers: tracing, CORS, cookie management.
pub fn create_router(state: AppState) -> Router {
    let require_auth = middleware::from_fn_with_state(state.clone(), auth_middleware);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/verify", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/verifyEmail", post(auth::send_registration_otp));

    let user_routes = Router::new()
        .route("/forgot-password", post(user::forgot_password))
        .route("/verify-otp", post(user::verify_otp))
        .route("/retry-otp", post(user::retry_otp))
        .route("/new-password", post(user::new_password))
        .route("/refresh", post(auth::refresh))
        .merge(
            Router::new()
                .route("/profile", get(user::profile))
                .route("/updateData", put(user::update_data))
                .route("/progress", get(user::get_progress))
                .route("/progress/update", post(user::update_progress))
                .layer(require_auth.clone()),
        );

    let topic_routes = Router::new()
        .route("/", get(topic::list_topics))
        .route("/chapters", get(topic::topics_with_chapters))
        .route("/{topic_id}", get(topic::get_topic))
        .route("/chapters/{topic_id}", get(topic::topic_chapters));

    let chapter_routes = Router::new()
        .route("/subchapters/{parent_chapter_id}", get(chapter::list_subchapters))
        .merge(
            Router::new()
                .route("/files/{chapter_id}", get(chapter::chapter_file))
                .layer(require_auth.clone()),
        );

    let quiz_routes = Router::new()
        .route("/topic", get(quiz::list_topic_quizzes))
        .route("/topic/{topic_id}", get(quiz::quizzes_by_topic))
        .route("/start", post(quiz::start_quiz))
        .route("/submit", post(quiz::submit_quiz))
        .route("/submit/{topic_id}/{quiz_id}", post(quiz::submit_quiz_for_topic))
        .layer(require_auth.clone());

    let admin_routes = Router::new()
        .route("/topic/create", post(admin::create_topic))
        .route("/topic/update/{topic_id}", put(admin::update_topic))
        .route("/chapter/create", post(admin::create_chapter))
        .route("/chapter/update/{chapter_id}", put(admin::update_chapter))
        .route("/quizzes/manage", post(admin::create_quiz))
        .route("/quizzes/update", put(admin::update_quiz))
        .route("/quizzes/assessments", get(admin::assessments))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        // Auth first, then the admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(require_auth);

    Router::new()
        .nest("/auth", auth_routes)
        .nest("/user", user_routes)
        .nest("/topics", topic_routes)
        .nest("/chapters", chapter_routes)
        .nest("/quizzes", quiz_routes)
        .nest("/admin", admin_routes)
        // Outermost first
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_origins))
                .layer(CookieManagerLayer::new()),
        )
        .with_state(state)
}
