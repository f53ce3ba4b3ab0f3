use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Категория события (фиксированный набор).
pub enum Category {
    /// Концерт.
    Concert,
    /// Конференция.
    Conference,
    /// Воркшоп.
    Workshop,
    /// Спорт.
    Sports,
    /// Искусство.
    Art,
    /// Технологии.
    Technology,
    /// Образование.
    Education,
    /// Встречи и вечеринки.
    Social,
    /// Бизнес.
    Business,
    /// Всё остальное.
    Other,
}

impl Category {
    /// Все категории в порядке отображения.
    pub const ALL: [Category; 10] = [
        Category::Concert,
        Category::Conference,
        Category::Workshop,
        Category::Sports,
        Category::Art,
        Category::Technology,
        Category::Education,
        Category::Social,
        Category::Business,
        Category::Other,
    ];

    /// Значение в колонке `category`.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Concert => "concert",
            Category::Conference => "conference",
            Category::Workshop => "workshop",
            Category::Sports => "sports",
            Category::Art => "art",
            Category::Technology => "technology",
            Category::Education => "education",
            Category::Social => "social",
            Category::Business => "business",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown category '{0}'")]
/// Строка не совпала ни с одной категорией.
pub struct ParseCategoryError(String);

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let needle = raw.trim().to_lowercase();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == needle)
            .ok_or_else(|| ParseCategoryError(raw.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Публичная модель события (строка коллекции `events`).
pub struct Event {
    /// Идентификатор события.
    pub id: String,
    /// Заголовок.
    pub title: String,
    /// Описание.
    pub description: String,
    /// Дата проведения.
    pub date: NaiveDate,
    /// Время начала.
    pub time: NaiveTime,
    /// Место проведения.
    pub location: String,
    /// Категория.
    pub category: Category,
    /// Максимум участников.
    pub max_participants: u32,
    /// Текущее число участников (ведёт бэкенд).
    #[serde(default)]
    pub current_participants: u32,
    /// Цена участия, 0 для бесплатных.
    #[serde(default)]
    pub price: f64,
    /// Владелец события.
    pub user_id: String,
    /// Дата и время создания (UTC).
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Остались ли свободные места.
    pub fn has_free_spots(&self) -> bool {
        self.current_participants < self.max_participants
    }

    /// Бесплатное ли событие.
    pub fn is_free(&self) -> bool {
        self.price == 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Данные для создания события, введённые пользователем.
pub struct EventDraft {
    /// Заголовок.
    pub title: String,
    /// Описание.
    pub description: String,
    /// Дата проведения.
    pub date: NaiveDate,
    /// Время начала.
    pub time: NaiveTime,
    /// Место проведения.
    pub location: String,
    /// Категория.
    pub category: Category,
    /// Максимум участников.
    pub max_participants: u32,
    /// Цена, по умолчанию 0.
    pub price: f64,
}

impl EventDraft {
    /// Нормализует черновик и проверяет инварианты модели.
    ///
    /// Дата события не может быть раньше `today`.
    pub fn validate(self, today: NaiveDate) -> ClientResult<Self> {
        if self.date < today {
            return Err(ClientError::Validation {
                field: "date",
                message: "must be today or later",
            });
        }
        validate_max_participants(self.max_participants)?;
        validate_price(self.price)?;

        Ok(Self {
            title: normalize_required("title", &self.title)?,
            description: normalize_required("description", &self.description)?,
            location: normalize_required("location", &self.location)?,
            ..self
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Строка для вставки в коллекцию `events`.
pub struct NewEvent {
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) date: NaiveDate,
    pub(crate) time: NaiveTime,
    pub(crate) location: String,
    pub(crate) category: Category,
    pub(crate) max_participants: u32,
    pub(crate) price: f64,
    pub(crate) user_id: String,
}

impl NewEvent {
    pub(crate) fn from_draft(draft: EventDraft, owner_id: &str) -> Self {
        Self {
            title: draft.title,
            description: draft.description,
            date: draft.date,
            time: draft.time,
            location: draft.location,
            category: draft.category,
            max_participants: draft.max_participants,
            price: draft.price,
            user_id: owner_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
/// Частичное обновление события: заменяются только заданные поля.
pub struct EventPatch {
    /// Новый заголовок.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Новое описание.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Новая дата.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Новое время.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    /// Новое место.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Новая категория.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Новый максимум участников.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_participants: Option<u32>,
    /// Новая цена.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl EventPatch {
    /// Не задано ни одного поля.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Нормализует заданные поля и проверяет инварианты модели.
    pub fn validate(self) -> ClientResult<Self> {
        if self.is_empty() {
            return Err(ClientError::Validation {
                field: "patch",
                message: "must change at least one field",
            });
        }
        if let Some(max_participants) = self.max_participants {
            validate_max_participants(max_participants)?;
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }

        Ok(Self {
            title: normalize_optional("title", self.title)?,
            description: normalize_optional("description", self.description)?,
            location: normalize_optional("location", self.location)?,
            ..self
        })
    }
}

fn normalize_required(field: &'static str, value: &str) -> ClientResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ClientError::Validation {
            field,
            message: "must not be empty",
        });
    }
    Ok(value.to_string())
}

fn normalize_optional(field: &'static str, value: Option<String>) -> ClientResult<Option<String>> {
    value
        .map(|value| normalize_required(field, &value))
        .transpose()
}

fn validate_max_participants(value: u32) -> ClientResult<()> {
    if value == 0 {
        return Err(ClientError::Validation {
            field: "max_participants",
            message: "must be > 0",
        });
    }
    Ok(())
}

fn validate_price(value: f64) -> ClientResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ClientError::Validation {
            field: "price",
            message: "must be a non-negative number",
        });
    }
    Ok(())
}
