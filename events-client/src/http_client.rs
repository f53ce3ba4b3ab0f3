use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_RANGE;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::backend::{AuthBackend, EventQuery, EventStore, Filter, Rows};
use crate::error::{ClientError, ClientResult};
use crate::event::{Event, EventPatch, NewEvent};
use crate::models::{
    AuthChangeEvent, AuthStateChange, ProfileMetadata, Session, SignUpOutcome, User,
};

const EVENTS_PATH: &str = "/rest/v1/events";
const AUTH_CHANGES_CAPACITY: usize = 16;
/// Сессию обновляем заранее, за минуту до истечения.
const EXPIRY_LEEWAY_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct PasswordGrantDto<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshGrantDto<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct SignUpRequestDto<'a> {
    email: &'a str,
    password: &'a str,
    data: &'a ProfileMetadata,
}

#[derive(Debug, Deserialize)]
struct ErrorResponseDto {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ErrorResponseDto {
    fn into_message(self) -> Option<String> {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .or(self.error)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponseDto {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    refresh_token: Option<String>,
    user: User,
}

impl TokenResponseDto {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now.timestamp() + secs));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at,
            user: self.user,
        }
    }
}

/// Параметры подключения к проекту бэкенда.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Базовый URL проекта, например `https://xyz.supabase.co`.
    pub url: String,
    /// Публичный (anon) ключ проекта.
    pub anon_key: String,
    /// Таймаут установки соединения.
    pub connect_timeout: Duration,
    /// Таймаут запроса целиком.
    pub request_timeout: Duration,
}

impl SupabaseConfig {
    /// Параметры с таймаутами по умолчанию (5 с и 15 с).
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// HTTP-реализация бэкенда: auth API и REST-коллекция `events`.
///
/// Хранит текущую сессию, подставляет её токен в запросы к данным и
/// рассылает уведомления при входе, выходе и обновлении токена.
#[derive(Debug)]
pub struct SupabaseBackend {
    base_url: String,
    anon_key: String,
    client: Client,
    session: Mutex<Option<Session>>,
    changes: broadcast::Sender<AuthStateChange>,
}

impl SupabaseBackend {
    /// Создаёт бэкенд без сессии.
    pub fn new(config: SupabaseConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        let (changes, _) = broadcast::channel(AUTH_CHANGES_CAPACITY);

        Ok(Self {
            base_url: config.url,
            anon_key: config.anon_key,
            client,
            session: Mutex::new(None),
            changes,
        })
    }

    /// Подставляет ранее сохранённую сессию и рассылает `InitialSession`.
    pub fn restore_session(&self, session: Session) {
        self.set_session(Some(session), AuthChangeEvent::InitialSession);
    }

    /// Текущая сессия как есть, без обновления токена.
    pub fn current_session(&self) -> Option<Session> {
        self.lock_session().clone()
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_session(&self, session: Option<Session>, event: AuthChangeEvent) {
        *self.lock_session() = session.clone();
        if self.changes.send(AuthStateChange { event, session }).is_err() {
            debug!(?event, "no auth listeners subscribed");
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn auth_request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        self.client
            .request(method, self.endpoint(path))
            .header("apikey", &self.anon_key)
            .bearer_auth(token.unwrap_or(&self.anon_key))
    }

    /// Токен для запросов к данным: токен сессии (обновлённый при
    /// необходимости) или anon-ключ.
    async fn data_token(&self) -> String {
        match self.get_session().await {
            Ok(Some(session)) => session.access_token,
            Ok(None) => self.anon_key.clone(),
            Err(err) => {
                warn!(error = %err, "session refresh failed, falling back to anon key");
                self.anon_key.clone()
            }
        }
    }

    async fn events_request(&self, method: Method, params: &[(String, String)]) -> RequestBuilder {
        let token = self.data_token().await;
        self.client
            .request(method, self.endpoint(EVENTS_PATH))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .query(params)
    }

    async fn decode_error(response: Response) -> ClientError {
        let status = response.status();

        let message = match response.json::<ErrorResponseDto>().await {
            Ok(body) => body.into_message(),
            Err(_) => None,
        };
        ClientError::from_http_status(status, message)
    }

    async fn send(request: RequestBuilder) -> ClientResult<Response> {
        let response = request.send().await.map_err(ClientError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(Self::decode_error(response).await);
        }
        Ok(response)
    }

    async fn password_grant(&self, email: &str, password: &str) -> ClientResult<Session> {
        let payload = PasswordGrantDto { email, password };
        let request = self
            .auth_request(Method::POST, "/auth/v1/token", None)
            .query(&[("grant_type", "password")])
            .json(&payload);

        let dto = Self::send(request)
            .await?
            .json::<TokenResponseDto>()
            .await
            .map_err(ClientError::from_reqwest)?;
        Ok(dto.into_session(Utc::now()))
    }

    async fn refresh_grant(&self, refresh_token: &str) -> ClientResult<Session> {
        let payload = RefreshGrantDto { refresh_token };
        let request = self
            .auth_request(Method::POST, "/auth/v1/token", None)
            .query(&[("grant_type", "refresh_token")])
            .json(&payload);

        let dto = Self::send(request)
            .await?
            .json::<TokenResponseDto>()
            .await
            .map_err(ClientError::from_reqwest)?;
        Ok(dto.into_session(Utc::now()))
    }
}

#[async_trait]
impl AuthBackend for SupabaseBackend {
    async fn get_session(&self) -> ClientResult<Option<Session>> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };
        if !session.is_expired(Utc::now(), EXPIRY_LEEWAY_SECS) {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token else {
            debug!("session expired without refresh token");
            self.set_session(None, AuthChangeEvent::SignedOut);
            return Ok(None);
        };

        match self.refresh_grant(&refresh_token).await {
            Ok(session) => {
                debug!(user_id = %session.user.id, "session refreshed");
                self.set_session(Some(session.clone()), AuthChangeEvent::TokenRefreshed);
                Ok(Some(session))
            }
            Err(err) => {
                self.set_session(None, AuthChangeEvent::SignedOut);
                Err(err)
            }
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> ClientResult<Session> {
        debug!(email, "signing in");
        let session = self.password_grant(email, password).await?;
        self.set_session(Some(session.clone()), AuthChangeEvent::SignedIn);
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: &ProfileMetadata,
    ) -> ClientResult<SignUpOutcome> {
        debug!(email, "signing up");
        let payload = SignUpRequestDto {
            email,
            password,
            data: profile,
        };
        let request = self
            .auth_request(Method::POST, "/auth/v1/signup", None)
            .json(&payload);

        let body = Self::send(request)
            .await?
            .json::<serde_json::Value>()
            .await
            .map_err(ClientError::from_reqwest)?;
        parse_sign_up(body, Utc::now())
    }

    async fn sign_out(&self) -> ClientResult<()> {
        let token = self.current_session().map(|session| session.access_token);

        let result = match token {
            Some(token) => {
                let request = self.auth_request(Method::POST, "/auth/v1/logout", Some(&token));
                Self::send(request).await.map(|_| ())
            }
            None => Ok(()),
        };

        self.set_session(None, AuthChangeEvent::SignedOut);
        result
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange> {
        self.changes.subscribe()
    }
}

#[async_trait]
impl EventStore for SupabaseBackend {
    async fn select(&self, query: EventQuery) -> ClientResult<Rows> {
        let params = query_params(&query);
        debug!(?params, "selecting events");

        let mut request = self.events_request(Method::GET, &params).await;
        if query.count {
            request = request.header("Prefer", "count=exact");
        }

        let response = Self::send(request).await?;
        let count = if query.count {
            response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_content_range_total)
        } else {
            None
        };

        let rows = response
            .json::<Vec<Event>>()
            .await
            .map_err(ClientError::from_reqwest)?;
        Ok(Rows { rows, count })
    }

    async fn insert(&self, row: NewEvent) -> ClientResult<Event> {
        let params = vec![("select".to_string(), "*".to_string())];
        let request = self
            .events_request(Method::POST, &params)
            .await
            .header("Prefer", "return=representation")
            .json(&[row]);

        let rows = Self::send(request)
            .await?
            .json::<Vec<Event>>()
            .await
            .map_err(ClientError::from_reqwest)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ClientError::Decode("insert returned no rows".to_string()))
    }

    async fn update(&self, id: &str, patch: EventPatch) -> ClientResult<Event> {
        let params = vec![
            ("id".to_string(), format!("eq.{id}")),
            ("select".to_string(), "*".to_string()),
        ];
        let request = self
            .events_request(Method::PATCH, &params)
            .await
            .header("Prefer", "return=representation")
            .json(&patch);

        let rows = Self::send(request)
            .await?
            .json::<Vec<Event>>()
            .await
            .map_err(ClientError::from_reqwest)?;
        rows.into_iter().next().ok_or(ClientError::NotFound)
    }

    async fn delete(&self, id: &str) -> ClientResult<()> {
        let params = vec![("id".to_string(), format!("eq.{id}"))];
        let request = self.events_request(Method::DELETE, &params).await;

        Self::send(request).await?;
        Ok(())
    }
}

fn query_params(query: &EventQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];

    for filter in &query.filters {
        match filter {
            Filter::Eq { column, value } => params.push((column.to_string(), format!("eq.{value}"))),
            Filter::Gte { column, value } => {
                params.push((column.to_string(), format!("gte.{value}")))
            }
        }
    }
    if let Some(order) = query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{direction}", order.column)));
    }
    if let Some(range) = query.range {
        params.push(("offset".to_string(), range.offset.to_string()));
        params.push(("limit".to_string(), range.limit.to_string()));
    }

    params
}

/// Общее число строк из `Content-Range: 0-9/25` (или `*/0`).
fn parse_content_range_total(raw: &str) -> Option<u64> {
    let (_, total) = raw.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn parse_sign_up(body: serde_json::Value, now: DateTime<Utc>) -> ClientResult<SignUpOutcome> {
    if body.get("access_token").is_some() {
        let dto: TokenResponseDto =
            serde_json::from_value(body).map_err(|err| ClientError::Decode(err.to_string()))?;
        let session = dto.into_session(now);
        return Ok(SignUpOutcome {
            user: session.user.clone(),
            session: Some(session),
        });
    }

    // без подтверждения email бэкенд возвращает пользователя без сессии
    let user_value = match body.get("user") {
        Some(user) => user.clone(),
        None => body,
    };
    let user: User =
        serde_json::from_value(user_value).map_err(|err| ClientError::Decode(err.to_string()))?;
    Ok(SignUpOutcome {
        user,
        session: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::backend::RowRange;

    fn backend(url: &str) -> SupabaseBackend {
        SupabaseBackend::new(SupabaseConfig::new(url, "anon")).expect("client must build")
    }

    #[test]
    fn endpoint_normalizes_slashes() {
        let backend = backend("http://localhost:54321/");
        assert_eq!(
            backend.endpoint("/rest/v1/events"),
            "http://localhost:54321/rest/v1/events"
        );
    }

    #[test]
    fn query_params_follow_rest_syntax() {
        let query = EventQuery::new()
            .eq("user_id", "u-1")
            .gte("date", "2026-10-19")
            .order_by("created_at", false)
            .range(RowRange::page(2, 10));

        let params = query_params(&query);
        let pairs: Vec<(&str, &str)> = params
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("select", "*"),
                ("user_id", "eq.u-1"),
                ("date", "gte.2026-10-19"),
                ("order", "created_at.desc"),
                ("offset", "20"),
                ("limit", "10"),
            ]
        );
    }

    #[test]
    fn content_range_total_is_parsed() {
        assert_eq!(parse_content_range_total("0-9/25"), Some(25));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn token_response_computes_expiry_from_expires_in() {
        let now = Utc.timestamp_opt(1_000, 0).single().expect("valid ts");
        let dto: TokenResponseDto = serde_json::from_str(
            r#"{"access_token":"a","expires_in":3600,"refresh_token":"r","user":{"id":"u-1"}}"#,
        )
        .expect("dto should parse");

        let session = dto.into_session(now);
        assert_eq!(session.expires_at, Some(4_600));
        assert_eq!(session.token_type, "bearer");
        assert_eq!(session.refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn sign_up_without_token_is_pending_confirmation() {
        let body = serde_json::json!({
            "id": "u-9",
            "email": "new@b.io",
            "user_metadata": {"firstName": "Ada", "lastName": "Lovelace"}
        });

        let outcome = parse_sign_up(body, Utc::now()).expect("must parse");
        assert!(outcome.is_pending_confirmation());
        assert_eq!(outcome.user.id, "u-9");
        assert_eq!(outcome.user.display_name(), "Ada Lovelace");
    }

    #[test]
    fn sign_up_with_token_carries_session() {
        let body = serde_json::json!({
            "access_token": "a",
            "expires_at": 99,
            "user": {"id": "u-9"}
        });

        let outcome = parse_sign_up(body, Utc::now()).expect("must parse");
        let session = outcome.session.expect("session expected");
        assert_eq!(session.expires_at, Some(99));
        assert_eq!(outcome.user.id, "u-9");
    }

    #[test]
    fn error_body_prefers_message_fields_in_order() {
        let dto: ErrorResponseDto = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        )
        .expect("dto should parse");
        assert_eq!(
            dto.into_message().as_deref(),
            Some("Invalid login credentials")
        );
    }

    #[tokio::test]
    async fn get_session_without_session_returns_none() {
        let backend = backend("http://127.0.0.1:9");
        assert!(backend.get_session().await.expect("no io").is_none());
    }

    #[tokio::test]
    async fn expired_session_without_refresh_token_is_dropped() {
        let backend = backend("http://127.0.0.1:9");
        backend.restore_session(Session {
            access_token: "old".to_string(),
            refresh_token: None,
            token_type: "bearer".to_string(),
            expires_at: Some(0),
            user: User {
                id: "u-1".to_string(),
                email: None,
                user_metadata: ProfileMetadata::default(),
                created_at: None,
            },
        });
        let mut changes = backend.on_auth_state_change();

        assert!(backend.get_session().await.expect("no io").is_none());
        assert!(backend.current_session().is_none());
        let change = changes.try_recv().expect("signed out must be broadcast");
        assert_eq!(change.event, AuthChangeEvent::SignedOut);
    }

    #[test]
    fn restored_session_is_announced_as_initial() {
        let backend = backend("http://127.0.0.1:9");
        let mut changes = backend.on_auth_state_change();

        backend.restore_session(Session {
            access_token: "saved".to_string(),
            refresh_token: Some("r".to_string()),
            token_type: "bearer".to_string(),
            expires_at: None,
            user: User {
                id: "u-3".to_string(),
                email: None,
                user_metadata: ProfileMetadata::default(),
                created_at: None,
            },
        });

        let change = changes.try_recv().expect("restore must be broadcast");
        assert_eq!(change.event, AuthChangeEvent::InitialSession);
        assert_eq!(
            change.session.map(|session| session.access_token).as_deref(),
            Some("saved")
        );
        assert_eq!(
            backend.current_session().map(|session| session.user.id).as_deref(),
            Some("u-3")
        );
    }
}
