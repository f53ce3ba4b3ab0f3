use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::ClientResult;
use crate::event::{Event, EventPatch, NewEvent};
use crate::models::{AuthStateChange, ProfileMetadata, Session, SignUpOutcome};

/// Полуоткрытый диапазон строк `[offset, offset + limit)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    /// Номер первой строки.
    pub offset: u64,
    /// Сколько строк вернуть.
    pub limit: u64,
}

impl RowRange {
    /// Диапазон страницы `page` (с нуля) при размере `page_size`.
    pub fn page(page: u32, page_size: u32) -> Self {
        let page_size = u64::from(page_size);
        Self {
            offset: u64::from(page) * page_size,
            limit: page_size,
        }
    }

    /// Первые `limit` строк.
    pub fn first(limit: u64) -> Self {
        Self { offset: 0, limit }
    }

    /// Граница диапазона (не включая).
    pub fn end(&self) -> u64 {
        self.offset + self.limit
    }
}

/// Условие на значение колонки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `column = value`.
    Eq {
        /// Колонка.
        column: &'static str,
        /// Значение.
        value: String,
    },
    /// `column >= value`.
    Gte {
        /// Колонка.
        column: &'static str,
        /// Нижняя граница.
        value: String,
    },
}

/// Сортировка по одной колонке.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    /// Колонка.
    pub column: &'static str,
    /// По возрастанию.
    pub ascending: bool,
}

/// Запрос к коллекции `events`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Условия, объединённые через AND.
    pub filters: Vec<Filter>,
    /// Сортировка.
    pub order: Option<Order>,
    /// Диапазон строк.
    pub range: Option<RowRange>,
    /// Вернуть точное общее число строк, подходящих под фильтры.
    pub count: bool,
}

impl EventQuery {
    /// Запрос без условий.
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет условие равенства.
    pub fn eq(mut self, column: &'static str, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Eq {
            column,
            value: value.into(),
        });
        self
    }

    /// Добавляет условие «не меньше».
    pub fn gte(mut self, column: &'static str, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Gte {
            column,
            value: value.into(),
        });
        self
    }

    /// Задаёт сортировку.
    pub fn order_by(mut self, column: &'static str, ascending: bool) -> Self {
        self.order = Some(Order { column, ascending });
        self
    }

    /// Ограничивает выборку диапазоном строк.
    pub fn range(mut self, range: RowRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Запрашивает общее число строк.
    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }
}

/// Строки выборки и общее число строк (если запрашивалось).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    /// Строки выборки.
    pub rows: Vec<Event>,
    /// Общее число строк под фильтрами.
    pub count: Option<u64>,
}

/// Аутентификация на стороне бэкенда.
///
/// Реализация сама хранит текущую сессию и рассылает уведомления об её
/// изменениях всем подписчикам `on_auth_state_change`.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Текущая сессия; просроченная обновляется или сбрасывается.
    async fn get_session(&self) -> ClientResult<Option<Session>>;
    /// Вход по email и паролю.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> ClientResult<Session>;
    /// Регистрация; сессия может отсутствовать до подтверждения email.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: &ProfileMetadata,
    ) -> ClientResult<SignUpOutcome>;
    /// Выход; локальная сессия очищается в любом случае.
    async fn sign_out(&self) -> ClientResult<()>;
    /// Подписка на уведомления об изменении сессии.
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange>;
}

/// Удалённая коллекция `events`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Выборка по запросу.
    async fn select(&self, query: EventQuery) -> ClientResult<Rows>;
    /// Вставляет строку и возвращает её в том виде, в котором её сохранил бэкенд.
    async fn insert(&self, row: NewEvent) -> ClientResult<Event>;
    /// Возвращает обновлённую строку; `NotFound`, если строки с `id` нет.
    async fn update(&self, id: &str, patch: EventPatch) -> ClientResult<Event>;
    /// Удаляет строку по `id`.
    async fn delete(&self, id: &str) -> ClientResult<()>;
}
