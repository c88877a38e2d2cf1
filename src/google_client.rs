// src/google_client.rs
//
// Minimal Google OAuth client for sign-in/signup: consent URL, code
// exchange, and userinfo lookup.
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Debug, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub token_type: String,
    pub scope: String,
}

#[derive(Debug, Deserialize)]
pub struct GoogleUserInfo {
    pub id: String,
    pub email: String,
    pub name: String,
    pub verified_email: bool,
}

/// Build the Google OAuth authorization URL.
pub fn build_oauth_url(client_id: &str, redirect_uri: &str, scopes: &[&str], state: &str) -> String {
    let scope_string = scopes.join(" ");
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&prompt=select_account",
        AUTH_ENDPOINT,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scope_string),
        urlencoding::encode(state)
    )
}

/// Exchange an authorization code for an access token.
pub async fn exchange_code_for_token(
    client: &Client,
    code: &str,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
) -> Result<GoogleTokenResponse, Box<dyn std::error::Error + Send + Sync>> {
    let params = json!({
        "code": code,
        "client_id": client_id,
        "client_secret": client_secret,
        "redirect_uri": redirect_uri,
        "grant_type": "authorization_code"
    });

    let response = client.post(TOKEN_ENDPOINT).json(&params).send().await?;

    if !response.status().is_success() {
        let error_text = response.text().await?;
        return Err(format!("Failed to exchange code: {}", error_text).into());
    }

    Ok(response.json().await?)
}

/// Fetch the signed-in user's profile from Google.
pub async fn get_user_info(
    client: &Client,
    access_token: &str,
) -> Result<GoogleUserInfo, Box<dyn std::error::Error + Send + Sync>> {
    let response = client
        .get(USERINFO_ENDPOINT)
        .header("Authorization", format!("Bearer {}", access_token))
        .send()
        .await?;

    if !response.status().is_success() {
        let error_text = response.text().await?;
        return Err(format!("Failed to get user info: {}", error_text).into());
    }

    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_url_encodes_parameters() {
        let url = build_oauth_url(
            "client-123",
            "http://localhost:3000/api/auth/google/callback",
            &["openid", "email"],
            "state token",
        );
        assert!(url.starts_with(AUTH_ENDPOINT));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("scope=openid%20email"));
        assert!(url.contains("state=state%20token"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000"));
    }
}
