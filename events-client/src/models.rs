use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Профиль пользователя, который хранится в `user_metadata` бэкенда.
pub struct ProfileMetadata {
    /// Имя.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Фамилия.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl ProfileMetadata {
    /// Создаёт профиль с именем и фамилией.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: Some(first_name.into()),
            last_name: Some(last_name.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Публичная модель пользователя.
pub struct User {
    /// Идентификатор пользователя.
    pub id: String,
    /// Email.
    #[serde(default)]
    pub email: Option<String>,
    /// Профиль (имя/фамилия).
    #[serde(default)]
    pub user_metadata: ProfileMetadata,
    /// Дата и время создания пользователя (UTC).
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Имя для отображения: «Имя Фамилия», иначе email, иначе идентификатор.
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [
            self.user_metadata.first_name.as_deref(),
            self.user_metadata.last_name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

        if !parts.is_empty() {
            return parts.join(" ");
        }
        self.email.clone().unwrap_or_else(|| self.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Сессия, выданная бэкендом: токены и пользователь.
pub struct Session {
    /// Access token для авторизованных запросов.
    pub access_token: String,
    /// Refresh token для продления сессии.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Тип токена (обычно `bearer`).
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Момент истечения access token (unix-секунды).
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Владелец сессии.
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Истекает ли сессия в момент `now` с запасом `leeway_secs`.
    ///
    /// Сессия без `expires_at` считается бессрочной.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now.timestamp() + leeway_secs,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Тип уведомления об изменении сессии.
pub enum AuthChangeEvent {
    /// Подставлена сохранённая сессия.
    InitialSession,
    /// Пользователь вошёл.
    SignedIn,
    /// Пользователь вышел (в том числе принудительно).
    SignedOut,
    /// Access token обновлён.
    TokenRefreshed,
}

#[derive(Debug, Clone, PartialEq)]
/// Уведомление бэкенда: событие и актуальная сессия.
pub struct AuthStateChange {
    /// Что произошло.
    pub event: AuthChangeEvent,
    /// Сессия после события (`None` после выхода).
    pub session: Option<Session>,
}

#[derive(Debug, Clone, PartialEq)]
/// Результат регистрации.
pub struct SignUpOutcome {
    /// Зарегистрированный пользователь.
    pub user: User,
    /// Сессия, если бэкенд выдал её сразу (без подтверждения email).
    pub session: Option<Session>,
}

impl SignUpOutcome {
    /// Требуется ли подтверждение аккаунта перед входом.
    pub fn is_pending_confirmation(&self) -> bool {
        self.session.is_none()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{AuthChangeEvent, ProfileMetadata, Session, User};

    fn user_with(first: Option<&str>, last: Option<&str>, email: Option<&str>) -> User {
        User {
            id: "u-1".to_string(),
            email: email.map(str::to_string),
            user_metadata: ProfileMetadata {
                first_name: first.map(str::to_string),
                last_name: last.map(str::to_string),
            },
            created_at: None,
        }
    }

    #[test]
    fn user_metadata_uses_camel_case_keys() {
        let raw = r#"{"id":"u-1","email":"a@b.io","user_metadata":{"firstName":"Ada","lastName":"Lovelace"}}"#;
        let user: User = serde_json::from_str(raw).expect("user should parse");
        assert_eq!(user.user_metadata.first_name.as_deref(), Some("Ada"));
        assert_eq!(user.display_name(), "Ada Lovelace");
    }

    #[test]
    fn display_name_falls_back_to_email_then_id() {
        assert_eq!(
            user_with(None, Some("  "), Some("a@b.io")).display_name(),
            "a@b.io"
        );
        assert_eq!(user_with(None, None, None).display_name(), "u-1");
        assert_eq!(user_with(Some("Ada"), None, None).display_name(), "Ada");
    }

    #[test]
    fn session_expiry_respects_leeway() {
        let now = Utc.timestamp_opt(1_000, 0).single().expect("valid ts");
        let session = Session {
            access_token: "t".to_string(),
            refresh_token: None,
            token_type: "bearer".to_string(),
            expires_at: Some(1_030),
            user: user_with(None, None, None),
        };

        assert!(!session.is_expired(now, 0));
        assert!(session.is_expired(now, 60));

        let endless = Session {
            expires_at: None,
            ..session
        };
        assert!(!endless.is_expired(now, 60));
    }

    #[test]
    fn auth_change_event_wire_names() {
        let raw = serde_json::to_string(&AuthChangeEvent::TokenRefreshed).expect("serialize");
        assert_eq!(raw, "\"TOKEN_REFRESHED\"");
    }
}
