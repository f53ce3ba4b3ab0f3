//! Проверки форм ввода: вход, регистрация, создание и изменение события.
//!
//! Менеджер сессии и репозиторий эти правила не применяют; их вызывает
//! слой ввода (CLI) до обращения к бэкенду. Значения сначала нормализуются
//! (обрезка пробелов, email в нижнем регистре), затем проверяются
//! декларативными правилами `validator`.

use chrono::NaiveDate;
use validator::Validate;

use crate::error::{ClientError, ClientResult};
use crate::event::{EventDraft, EventPatch};
use crate::models::ProfileMetadata;

#[derive(Debug, Clone, Validate)]
/// Форма входа.
pub struct LoginForm {
    /// Email.
    #[validate(email)]
    pub email: String,
    /// Пароль.
    #[validate(length(min = 6))]
    pub password: String,
}

impl LoginForm {
    /// Нормализует email и проверяет форму.
    pub fn validated(self) -> ClientResult<Self> {
        let form = Self {
            email: normalize_email(&self.email),
            password: self.password,
        };
        form.validate()?;
        Ok(form)
    }
}

#[derive(Debug, Clone, Validate)]
/// Форма регистрации.
pub struct RegistrationForm {
    /// Имя.
    #[validate(length(min = 2))]
    pub first_name: String,
    /// Фамилия.
    #[validate(length(min = 2))]
    pub last_name: String,
    /// Email.
    #[validate(email)]
    pub email: String,
    /// Пароль.
    #[validate(length(min = 6))]
    pub password: String,
    /// Повтор пароля.
    #[validate(must_match(other = "password"))]
    pub confirm_password: String,
}

impl RegistrationForm {
    /// Обрезает имена, нормализует email и проверяет форму.
    pub fn validated(self) -> ClientResult<Self> {
        let form = Self {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: normalize_email(&self.email),
            ..self
        };
        form.validate()?;
        Ok(form)
    }

    /// Профиль, который уходит в метаданные пользователя.
    pub fn profile(&self) -> ProfileMetadata {
        ProfileMetadata::new(&self.first_name, &self.last_name)
    }
}

/// Поля события, которые проверяет форма. Незаданные поля пропускаются,
/// поэтому одна и та же форма обслуживает и создание, и изменение.
#[derive(Debug, Default, Validate)]
struct EventForm {
    #[validate(length(min = 3, max = 100))]
    title: Option<String>,
    #[validate(length(min = 10, max = 1000))]
    description: Option<String>,
    #[validate(length(min = 3, max = 200))]
    location: Option<String>,
    #[validate(range(min = 1, max = 1000))]
    max_participants: Option<u32>,
    #[validate(range(min = 0.0))]
    price: Option<f64>,
}

/// Правила формы создания события.
pub fn validate_event_form(draft: &EventDraft, today: NaiveDate) -> ClientResult<()> {
    let form = EventForm {
        title: Some(trimmed(&draft.title)),
        description: Some(trimmed(&draft.description)),
        location: Some(trimmed(&draft.location)),
        max_participants: Some(draft.max_participants),
        price: Some(draft.price),
    };
    form.validate()?;
    check_date(Some(draft.date), today)
}

/// Правила формы изменения события: проверяются только заданные поля.
pub fn validate_event_patch(patch: &EventPatch, today: NaiveDate) -> ClientResult<()> {
    let form = EventForm {
        title: patch.title.as_deref().map(trimmed),
        description: patch.description.as_deref().map(trimmed),
        location: patch.location.as_deref().map(trimmed),
        max_participants: patch.max_participants,
        price: patch.price,
    };
    form.validate()?;
    check_date(patch.date, today)
}

fn check_date(date: Option<NaiveDate>, today: NaiveDate) -> ClientResult<()> {
    match date {
        Some(date) if date < today => Err(ClientError::Validation {
            field: "date",
            message: "must be in the future",
        }),
        _ => Ok(()),
    }
}

fn trimmed(value: &str) -> String {
    value.trim().to_string()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
