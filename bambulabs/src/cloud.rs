//! Bambu cloud account login and broker credential derivation.

use base64::Engine;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::{pool::Credentials, Error, Result};

/// The public cloud API.
pub const API_BASE: &str = "https://api.bambulab.com";

const LOGIN_PATH: &str = "/v1/user-service/user/login";
const MESSAGES_PATH: &str = "/v1/user-service/my/messages";
const PROJECTS_PATH: &str = "/v1/iot-service/api/user/project";

/// The access token value the cloud returns when a second factor is needed.
const VERIFY_CODE_SENTINEL: &str = "verifyCode";

/// What the account proves its identity with.
#[derive(Clone)]
pub enum Secret {
    /// The account password.
    Password(String),
    /// A one-time code emailed to the account owner.
    VerificationCode(String),
}

#[derive(Serialize)]
#[serde(untagged)]
enum LoginRequest<'a> {
    Password { account: &'a str, password: &'a str },
    Code { account: &'a str, code: &'a str },
}

/// HTTP client for the cloud account API.
#[derive(Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    base: Url,
}

impl CloudClient {
    /// Create a client against the public cloud.
    pub fn new() -> Result<Self> {
        Self::with_base_url(API_BASE)
    }

    /// Create a client against another API host.
    pub fn with_base_url(base: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: Url::parse(base)?,
        })
    }

    /// Exchange account credentials for an access token.
    pub async fn login(&self, account: &str, secret: &Secret) -> Result<String> {
        let body = match secret {
            Secret::Password(password) => LoginRequest::Password { account, password },
            Secret::VerificationCode(code) => LoginRequest::Code { account, code },
        };

        let response = self.http.post(self.base.join(LOGIN_PATH)?).json(&body).send().await?;
        let status = response.status();
        match (status, secret) {
            (StatusCode::BAD_REQUEST, Secret::VerificationCode(_)) => {
                return Err(Error::Authentication(
                    "verification code was rejected, it may have expired".to_string(),
                ));
            }
            (StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
                return Err(Error::Authentication(format!(
                    "cloud rejected the account credentials ({})",
                    status
                )));
            }
            _ => {}
        }

        let body: Value = response.error_for_status()?.json().await?;
        access_token_from_login(&body)
    }

    /// Whether the cloud still accepts this token.
    pub async fn is_token_authorized(&self, token: &str) -> Result<bool> {
        let response = self
            .http
            .get(self.base.join(MESSAGES_PATH)?)
            .bearer_auth(token)
            .send()
            .await?;
        Ok(response.status() != StatusCode::UNAUTHORIZED)
    }

    /// Fail with an authentication error unless the token is accepted.
    pub async fn ensure_token_authorized(&self, token: &str) -> Result<()> {
        if self.is_token_authorized(token).await? {
            Ok(())
        } else {
            Err(Error::Authentication("access token is no longer valid".to_string()))
        }
    }

    /// Derive the broker login for an access token.
    ///
    /// The username is read from the token itself when it is a JWT, and
    /// otherwise from the owner of the first project on the account.
    pub async fn broker_credentials(&self, token: &str) -> Result<Credentials> {
        let username = match username_from_jwt(token)? {
            Some(username) => username,
            None => {
                tracing::debug!("access token is not a jwt, looking up username from projects");
                self.username_from_projects(token).await?
            }
        };

        Ok(Credentials {
            username,
            token: token.to_string(),
        })
    }

    async fn username_from_projects(&self, token: &str) -> Result<String> {
        let body: Value = self
            .http
            .get(self.base.join(PROJECTS_PATH)?)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        username_from_projects(&body)
    }
}

fn access_token_from_login(body: &Value) -> Result<String> {
    let token = body
        .get("accessToken")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::SchemaDrift("login response has no accessToken".to_string()))?;

    if token.trim().is_empty() {
        return Err(Error::Authentication("login response carried an empty access token".to_string()));
    }
    if token == VERIFY_CODE_SENTINEL {
        return Err(Error::Authentication(
            "account requires an emailed verification code to log in".to_string(),
        ));
    }

    Ok(token.to_string())
}

/// Read the broker username out of a JWT access token.
///
/// Returns `Ok(None)` when the token is not a three-segment JWT, and an
/// error when it is one but the payload has no `username`.
pub fn username_from_jwt(token: &str) -> Result<Option<String>> {
    let segments: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = segments.as_slice() else {
        return Ok(None);
    };

    let padded = format!("{}{}", payload, "=".repeat((4 - payload.len() % 4) % 4));
    let decoded = base64::engine::general_purpose::URL_SAFE
        .decode(padded)
        .map_err(|err| Error::SchemaDrift(format!("access token payload is not base64url: {}", err)))?;
    let claims: Value = serde_json::from_slice(&decoded)
        .map_err(|err| Error::SchemaDrift(format!("access token payload is not json: {}", err)))?;

    claims
        .get("username")
        .and_then(Value::as_str)
        .map(|username| Some(username.to_string()))
        .ok_or_else(|| Error::SchemaDrift("access token has no username claim".to_string()))
}

fn username_from_projects(body: &Value) -> Result<String> {
    body.get("projects")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find_map(|project| match project.get("user_id")? {
            Value::String(id) => Some(format!("u_{}", id)),
            Value::Number(id) => Some(format!("u_{}", id)),
            _ => None,
        })
        .ok_or_else(|| Error::SchemaDrift("no project on the account carries a user_id".to_string()))
}
