use thiserror::Error;

#[derive(Debug, Error)]
/// Ошибки клиентской библиотеки `events-client`.
pub enum ClientError {
    /// Ошибка HTTP-транспорта (`reqwest`).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Требуется авторизация (нет сессии или токен отклонён бэкендом).
    #[error("unauthorized")]
    Unauthorized,

    /// Запрошенный ресурс не найден.
    #[error("not found")]
    NotFound,

    /// Бэкенд отклонил запрос; сообщение взято из тела ответа.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Нарушено ограничение модели на стороне клиента.
    #[error("validation failed for '{field}': {message}")]
    Validation {
        /// Имя поля.
        field: &'static str,
        /// Описание нарушения.
        message: &'static str,
    },

    /// Поля формы не прошли декларативные проверки.
    #[error("validation error: {0}")]
    Form(#[from] validator::ValidationErrors),

    /// Ответ бэкенда не удалось разобрать.
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Результат операций `events-client`.
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub(crate) fn from_http_status(status: reqwest::StatusCode, message: Option<String>) -> Self {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Self::Unauthorized
            }
            reqwest::StatusCode::NOT_FOUND => Self::NotFound,
            _ => {
                let message = message.unwrap_or_else(|| format!("http status {status}"));
                Self::InvalidRequest(message)
            }
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_http_status(status, None);
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        Self::Http(err)
    }
}
