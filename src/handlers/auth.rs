use crate::google_client;
use crate::models::auth::*;
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{Html, Json, Redirect},
    routing::{get, post, Router},
};
use base64::Engine;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::Deserialize;
use serde_json::json;
use sqlx::FromRow;
use std::sync::Arc;

pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/verify", get(verify_token))
        .route("/api/auth/google", get(initiate_google_oauth))
        .route("/api/auth/google/callback", get(google_oauth_callback))
}

async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, Json<ErrorResponse>)> {
    if payload.email.is_empty() || payload.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                message: "Email and password are required".to_string(),
            }),
        ));
    }

    if payload.password.len() < 6 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                message: "Password must be at least 6 characters long".to_string(),
            }),
        ));
    }

    let existing_user = sqlx::query("SELECT id FROM users WHERE email = $1")
        .bind(&payload.email)
        .fetch_optional(&state.db_pool)
        .await;

    match existing_user {
        Ok(Some(_)) => {
            return Err((
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    success: false,
                    message: "User with this email already exists".to_string(),
                }),
            ));
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Database error checking existing user: {}", e);
            return Err(internal_error());
        }
    }

    let password_hash = match hash(&payload.password, DEFAULT_COST) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!("Error hashing password: {}", e);
            return Err(internal_error());
        }
    };

    let user_row = sqlx::query(
        "INSERT INTO users (email, password_hash, is_active, created_at, updated_at)
         VALUES ($1, $2, true, NOW(), NOW())
         RETURNING id, email, password_hash, google_id, is_active, created_at, updated_at",
    )
    .bind(&payload.email)
    .bind(&password_hash)
    .fetch_one(&state.db_pool)
    .await;

    let mut user = match user_row {
        Ok(row) => match User::from_row(&row) {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("Error converting row to User: {}", e);
                return Err(internal_error());
            }
        },
        Err(e) => {
            tracing::error!("Error creating user: {}", e);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    success: false,
                    message: "Failed to create user".to_string(),
                }),
            ));
        }
    };
    user.password_hash = String::new(); // Don't include password hash in response

    // Registration also seeds the default preferences document.
    if let Err(e) = sqlx::query(
        "INSERT INTO preferences (user_id, theme, language)
         VALUES ($1, 'light', 'en')
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user.id)
    .execute(&state.db_pool)
    .await
    {
        tracing::error!("Failed to seed preferences for user {}: {}", user.id, e);
    }

    let token = generate_jwt_token(&user)?;

    Ok(Json(AuthResponse {
        success: true,
        message: "User registered successfully".to_string(),
        user: UserResponse::from(user),
        token,
    }))
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, Json<ErrorResponse>)> {
    if payload.email.is_empty() || payload.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                message: "Email and password are required".to_string(),
            }),
        ));
    }

    let user_row = sqlx::query(
        "SELECT id, email, password_hash, google_id, is_active, created_at, updated_at
         FROM users WHERE email = $1 AND is_active = true",
    )
    .bind(&payload.email)
    .fetch_optional(&state.db_pool)
    .await;

    let user = match user_row {
        Ok(Some(row)) => match User::from_row(&row) {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("Error converting row to User: {}", e);
                return Err(internal_error());
            }
        },
        Ok(None) => return Err(invalid_credentials()),
        Err(e) => {
            tracing::error!("Database error finding user: {}", e);
            return Err(internal_error());
        }
    };

    match verify(&payload.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => return Err(invalid_credentials()),
        Err(e) => {
            tracing::error!("Error verifying password: {}", e);
            return Err(internal_error());
        }
    }

    let token = generate_jwt_token(&user)?;

    Ok(Json(AuthResponse {
        success: true,
        message: "Login successful".to_string(),
        user: UserResponse::from(user),
        token,
    }))
}

async fn verify_token(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let token = crate::middleware::auth::bearer_token(&headers)?;

    let claims = match verify_jwt_token(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("JWT verification failed: {}", e);
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    success: false,
                    message: "Invalid or expired token".to_string(),
                }),
            ));
        }
    };

    let user_row = sqlx::query(
        "SELECT id, email, password_hash, google_id, is_active, created_at, updated_at
         FROM users WHERE id = $1 AND is_active = true",
    )
    .bind(claims.sub.parse::<i32>().unwrap_or(0))
    .fetch_optional(&state.db_pool)
    .await;

    let mut user = match user_row {
        Ok(Some(row)) => match User::from_row(&row) {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("Error converting row to User: {}", e);
                return Err(internal_error());
            }
        },
        Ok(None) => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    success: false,
                    message: "User not found".to_string(),
                }),
            ));
        }
        Err(e) => {
            tracing::error!("Database error finding user: {}", e);
            return Err(internal_error());
        }
    };
    user.password_hash = String::new();

    Ok(Json(json!({
        "success": true,
        "user": UserResponse::from(user)
    })))
}

fn jwt_secret() -> String {
    std::env::var("JWT_SECRET").unwrap_or_else(|_| "default_secret".to_string())
}

pub fn generate_jwt_token(user: &User) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .expect("valid timestamp")
        .timestamp();

    let claims = Claims {
        sub: user.id.to_string(),
        email: user.email.clone(),
        exp: expiration as usize,
        iat: Utc::now().timestamp() as usize,
    };

    match encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret().as_ref()),
    ) {
        Ok(token) => Ok(token),
        Err(e) => {
            tracing::error!("Error generating JWT token: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    success: false,
                    message: "Failed to generate authentication token".to_string(),
                }),
            ))
        }
    }
}

pub fn verify_jwt_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret().as_ref()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

fn internal_error() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            success: false,
            message: "Internal server error".to_string(),
        }),
    )
}

fn invalid_credentials() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            success: false,
            message: "Invalid email or password".to_string(),
        }),
    )
}

// ============================================================================
// Google OAuth Login/Signup
// ============================================================================

#[derive(Deserialize)]
pub struct GoogleOAuthQuery {
    pub redirect_to: Option<String>,
}

#[derive(Deserialize)]
pub struct GoogleCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

fn google_redirect_uri() -> String {
    std::env::var("GOOGLE_OAUTH_REDIRECT_URI")
        .unwrap_or_else(|_| "http://localhost:3000/api/auth/google/callback".to_string())
}

/// Initiate Google OAuth login/signup.
pub async fn initiate_google_oauth(
    Query(params): Query<GoogleOAuthQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Redirect, (StatusCode, Json<ErrorResponse>)> {
    let client_id = state.google_oauth_client_id.as_ref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                success: false,
                message: "Google OAuth not configured".to_string(),
            }),
        )
    })?;

    let state_data = json!({
        "redirect_to": params.redirect_to.unwrap_or_else(|| "/".to_string()),
        "timestamp": Utc::now().timestamp()
    });
    let state_param = base64::prelude::BASE64_URL_SAFE_NO_PAD.encode(state_data.to_string());

    let scopes = [
        "https://www.googleapis.com/auth/userinfo.email",
        "https://www.googleapis.com/auth/userinfo.profile",
        "openid",
    ];

    let auth_url =
        google_client::build_oauth_url(client_id, &google_redirect_uri(), &scopes, &state_param);

    tracing::info!("Initiating Google OAuth login");

    Ok(Redirect::to(&auth_url))
}

/// Handle the Google OAuth callback: exchange the code, fetch the
/// profile, create or link the local account, and hand back a JWT.
pub async fn google_oauth_callback(
    Query(params): Query<GoogleCallbackQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    if let Some(error) = params.error {
        tracing::error!("Google OAuth error: {}", error);
        return Ok(Html(format!(
            r#"<!DOCTYPE html><html><head><title>Login Failed</title></head><body>
            <h1>Login Failed</h1><p>Error: {}</p><a href="/">Try Again</a>
            </body></html>"#,
            error
        )));
    }

    let code = params.code.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Html("<h1>Missing authorization code</h1>".to_string()),
        )
    })?;

    let state_param = params.state.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Html("<h1>Missing state parameter</h1>".to_string()),
        )
    })?;

    let state_bytes = base64::prelude::BASE64_URL_SAFE_NO_PAD
        .decode(&state_param)
        .map_err(|_| (StatusCode::BAD_REQUEST, Html("<h1>Invalid state</h1>".to_string())))?;
    let state_str = String::from_utf8(state_bytes)
        .map_err(|_| (StatusCode::BAD_REQUEST, Html("<h1>Invalid state</h1>".to_string())))?;
    let state_data: serde_json::Value = serde_json::from_str(&state_str)
        .map_err(|_| (StatusCode::BAD_REQUEST, Html("<h1>Invalid state</h1>".to_string())))?;
    let redirect_to = state_data["redirect_to"].as_str().unwrap_or("/").to_string();

    let (client_id, client_secret) = match (
        state.google_oauth_client_id.as_ref(),
        state.google_oauth_client_secret.as_ref(),
    ) {
        (Some(id), Some(secret)) => (id, secret),
        _ => {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Html("<h1>Google OAuth not configured</h1>".to_string()),
            ));
        }
    };

    let client = reqwest::Client::new();
    let token_response = google_client::exchange_code_for_token(
        &client,
        &code,
        client_id,
        client_secret,
        &google_redirect_uri(),
    )
    .await
    .map_err(|e| {
        tracing::error!("Failed to exchange code: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html("<h1>Failed to exchange authorization code</h1>".to_string()),
        )
    })?;

    let user_info = google_client::get_user_info(&client, &token_response.access_token)
        .await
        .map_err(|e| {
            tracing::error!("Failed to get user info: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("<h1>Failed to get user info</h1>".to_string()),
            )
        })?;

    let user = find_or_create_google_user(&state, &user_info)
        .await
        .map_err(|e| {
            tracing::error!("Database error during Google sign-in: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("<h1>Database error</h1>".to_string()),
            )
        })?;

    let token = generate_jwt_token(&user).map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html("<h1>Failed to generate token</h1>".to_string()),
        )
    })?;

    // Store the token client-side and bounce back into the app.
    Ok(Html(format!(
        r#"<!DOCTYPE html><html><head><title>Login Successful</title></head><body>
        <h1>Successfully logged in with Google</h1>
        <p>Redirecting...</p>
        <script>
            localStorage.setItem('authToken', '{}');
            setTimeout(() => window.location.href = '{}', 1000);
        </script>
        </body></html>"#,
        token, redirect_to
    )))
}

async fn find_or_create_google_user(
    state: &AppState,
    user_info: &google_client::GoogleUserInfo,
) -> Result<User, sqlx::Error> {
    if let Some(user) = sqlx::query_as::<_, User>("SELECT * FROM users WHERE google_id = $1")
        .bind(&user_info.id)
        .fetch_optional(&state.db_pool)
        .await?
    {
        tracing::info!("Existing user logged in via Google: {}", user.email);
        return Ok(user);
    }

    // Same email already registered with a password: link the accounts.
    if let Some(user) = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&user_info.email)
        .fetch_optional(&state.db_pool)
        .await?
    {
        sqlx::query("UPDATE users SET google_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(&user_info.id)
            .bind(user.id)
            .execute(&state.db_pool)
            .await?;
        tracing::info!("Linked Google account to existing user: {}", user.email);
        return Ok(user);
    }

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (email, password_hash, google_id, is_active, created_at, updated_at)
         VALUES ($1, '', $2, true, NOW(), NOW())
         RETURNING id, email, password_hash, google_id, is_active, created_at, updated_at",
    )
    .bind(&user_info.email)
    .bind(&user_info.id)
    .fetch_one(&state.db_pool)
    .await?;

    sqlx::query(
        "INSERT INTO preferences (user_id, theme, language)
         VALUES ($1, 'light', 'en')
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user.id)
    .execute(&state.db_pool)
    .await?;

    tracing::info!("Created new user via Google OAuth: {}", user.email);
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> User {
        User {
            id: 7,
            email: "user@example.com".to_string(),
            password_hash: String::new(),
            google_id: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_jwt_roundtrip() {
        let user = test_user();
        let token = generate_jwt_token(&user).expect("token");
        let claims = verify_jwt_token(&token).expect("claims");
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.email, "user@example.com");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        assert!(verify_jwt_token("not-a-jwt").is_err());
    }
}
