//! Лента событий с подгрузкой страниц.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{NaiveDate, Utc};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::backend::{EventQuery, EventStore, RowRange};
use crate::error::{ClientError, ClientResult};
use crate::event::{Event, EventDraft, EventPatch, NewEvent};

/// Размер страницы ленты по умолчанию.
pub const DEFAULT_PAGE_SIZE: u32 = 10;
/// Сколько ближайших событий возвращает [`EventRepository::upcoming_events`].
pub const UPCOMING_LIMIT: u64 = 10;

const CREATED_AT: &str = "created_at";

#[derive(Debug, Clone, PartialEq)]
/// Накопленное состояние ленты.
pub struct PageState {
    /// Все загруженные с последнего сброса события, новые сверху.
    pub events: Vec<Event>,
    /// Последняя загруженная страница.
    pub current_page: u32,
    /// Размер страницы.
    pub page_size: u32,
    /// Есть ли ещё незагруженные страницы.
    pub has_more: bool,
    /// Выполняется запрос.
    pub loading: bool,
    /// Сообщение последней ошибки.
    pub error: Option<String>,
    /// Общее число событий по данным бэкенда.
    pub total_count: Option<u64>,
}

impl PageState {
    fn new(page_size: u32) -> Self {
        Self {
            events: Vec::new(),
            current_page: 0,
            page_size,
            has_more: true,
            loading: false,
            error: None,
            total_count: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Чем закончилась загрузка страницы.
pub enum FetchOutcome {
    /// Страница загружена и добавлена в ленту.
    Fetched {
        /// Сколько строк вернул бэкенд.
        received: usize,
    },
    /// Запрос не понадобился.
    Skipped,
    /// Лента была сброшена, пока шёл запрос; ответ отброшен.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
/// Отдельная страница без накопления.
pub struct EventsPage {
    /// События страницы.
    pub events: Vec<Event>,
    /// Общее число событий.
    pub total_count: u64,
    /// Есть ли страницы после этой.
    pub has_more: bool,
}

/// Доступ к коллекции `events` и накопленная лента для бесконечной прокрутки.
pub struct EventRepository<S: EventStore> {
    store: Arc<S>,
    state: watch::Sender<PageState>,
    generation: AtomicU64,
}

impl<S: EventStore> EventRepository<S> {
    /// Репозиторий с размером страницы [`DEFAULT_PAGE_SIZE`].
    pub fn new(store: Arc<S>) -> Self {
        Self::with_page_size(store, DEFAULT_PAGE_SIZE)
    }

    /// Репозиторий с заданным размером страницы (не меньше 1).
    pub fn with_page_size(store: Arc<S>, page_size: u32) -> Self {
        let (state, _) = watch::channel(PageState::new(page_size.max(1)));
        Self {
            store,
            state,
            generation: AtomicU64::new(0),
        }
    }

    /// Снимок текущего состояния ленты.
    pub fn state(&self) -> PageState {
        self.state.borrow().clone()
    }

    /// Подписка на изменения ленты.
    pub fn subscribe(&self) -> watch::Receiver<PageState> {
        self.state.subscribe()
    }

    /// Загружает страницу `page` ленты.
    ///
    /// Без `reset` повторный запрос уже загруженной (или более ранней)
    /// страницы при непустой ленте ничего не делает. С `reset` лента
    /// заменяется ответом, а незавершённые загрузки устаревают.
    pub async fn fetch_page(&self, page: u32, reset: bool) -> ClientResult<FetchOutcome> {
        let generation = if reset {
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.generation.load(Ordering::SeqCst)
        };

        let claimed = self.state.send_if_modified(|state| {
            if !reset && page <= state.current_page && !state.events.is_empty() {
                return false;
            }
            state.loading = true;
            state.error = None;
            true
        });
        if !claimed {
            debug!(page, "page already loaded, skipping fetch");
            return Ok(FetchOutcome::Skipped);
        }

        self.load_page(page, reset, generation).await
    }

    /// Догружает следующую страницу, если она есть и ничего не загружается.
    pub async fn load_more(&self) -> ClientResult<FetchOutcome> {
        let mut next_page = 0;
        let claimed = self.state.send_if_modified(|state| {
            if !state.has_more || state.loading {
                return false;
            }
            next_page = if state.events.is_empty() {
                0
            } else {
                state.current_page + 1
            };
            state.loading = true;
            state.error = None;
            true
        });
        if !claimed {
            return Ok(FetchOutcome::Skipped);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        self.load_page(next_page, false, generation).await
    }

    async fn load_page(
        &self,
        page: u32,
        reset: bool,
        generation: u64,
    ) -> ClientResult<FetchOutcome> {
        let page_size = self.state.borrow().page_size;
        let query = EventQuery::new()
            .order_by(CREATED_AT, false)
            .range(RowRange::page(page, page_size))
            .with_count();

        let result = self.store.select(query).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(page, "feed was reset while loading, dropping page");
            return Ok(FetchOutcome::Stale);
        }

        match result {
            Ok(rows) => {
                let received = rows.rows.len();
                self.state.send_modify(|state| {
                    if reset {
                        state.events = rows.rows;
                    } else {
                        state.events.extend(rows.rows);
                    }
                    state.current_page = page;
                    state.has_more = match rows.count {
                        Some(total) => total > state.events.len() as u64,
                        None => received as u64 == u64::from(page_size),
                    };
                    state.total_count = rows.count;
                    state.loading = false;
                });
                debug!(page, received, "events page loaded");
                Ok(FetchOutcome::Fetched { received })
            }
            Err(err) => {
                self.record_failure("fetch_page", &err);
                Err(err)
            }
        }
    }

    /// Создаёт событие от имени `owner_id`.
    ///
    /// В ленту попадает строка, которую вернул бэкенд, и только после
    /// подтверждения записи.
    pub async fn create_event(&self, owner_id: &str, draft: EventDraft) -> ClientResult<Event> {
        self.begin_mutation();

        let result = match prepare_new_event(owner_id, draft, Utc::now().date_naive()) {
            Ok(row) => self.store.insert(row).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(created) => {
                self.state.send_modify(|state| {
                    state.events.insert(0, created.clone());
                    state.loading = false;
                });
                Ok(created)
            }
            Err(err) => {
                self.record_failure("create_event", &err);
                Err(err)
            }
        }
    }

    /// Событие по идентификатору. Ленту не меняет.
    pub async fn get_event_by_id(&self, id: &str) -> ClientResult<Event> {
        let query = EventQuery::new().eq("id", id).range(RowRange::first(1));
        let rows = self
            .store
            .select(query)
            .await
            .inspect_err(|err| error!(id, error = %err, "get event failed"))?;

        rows.rows.into_iter().next().ok_or(ClientError::NotFound)
    }

    /// Частично обновляет событие и заменяет его в ленте на том же месте.
    pub async fn update_event(&self, id: &str, patch: EventPatch) -> ClientResult<Event> {
        self.begin_mutation();

        let result = match patch.validate() {
            Ok(patch) => self.store.update(id, patch).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(updated) => {
                self.state.send_modify(|state| {
                    if let Some(slot) = state.events.iter_mut().find(|event| event.id == id) {
                        *slot = updated.clone();
                    }
                    state.loading = false;
                });
                Ok(updated)
            }
            Err(err) => {
                self.record_failure("update_event", &err);
                Err(err)
            }
        }
    }

    /// Удаляет событие и убирает его из ленты.
    pub async fn delete_event(&self, id: &str) -> ClientResult<()> {
        self.begin_mutation();

        match self.store.delete(id).await {
            Ok(()) => {
                self.state.send_modify(|state| {
                    state.events.retain(|event| event.id != id);
                    state.loading = false;
                });
                Ok(())
            }
            Err(err) => {
                self.record_failure("delete_event", &err);
                Err(err)
            }
        }
    }

    /// Сбрасывает ленту к начальному состоянию.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|state| {
            *state = PageState::new(state.page_size);
        });
    }

    /// Одна страница ленты без накопления.
    pub async fn events_page(&self, page: u32, page_size: u32) -> ClientResult<EventsPage> {
        let page_size = page_size.max(1);
        let query = EventQuery::new()
            .order_by(CREATED_AT, false)
            .range(RowRange::page(page, page_size))
            .with_count();
        let rows = self
            .store
            .select(query)
            .await
            .inspect_err(|err| warn!(page, error = %err, "events page query failed"))?;

        let total_count = rows.count.unwrap_or(0);
        Ok(EventsPage {
            events: rows.rows,
            total_count,
            has_more: total_count > (u64::from(page) + 1) * u64::from(page_size),
        })
    }

    /// События пользователя, новые сверху.
    pub async fn events_by_owner(&self, user_id: &str) -> ClientResult<Vec<Event>> {
        let query = EventQuery::new()
            .eq("user_id", user_id)
            .order_by(CREATED_AT, false);
        let rows = self
            .store
            .select(query)
            .await
            .inspect_err(|err| warn!(user_id, error = %err, "user events query failed"))?;
        Ok(rows.rows)
    }

    /// Ближайшие события начиная с сегодняшнего дня.
    pub async fn upcoming_events(&self) -> ClientResult<Vec<Event>> {
        self.upcoming_events_from(Utc::now().date_naive()).await
    }

    /// Не более [`UPCOMING_LIMIT`] событий с датой не раньше `today`,
    /// по возрастанию даты.
    pub async fn upcoming_events_from(&self, today: NaiveDate) -> ClientResult<Vec<Event>> {
        let query = EventQuery::new()
            .gte("date", today.format("%Y-%m-%d").to_string())
            .order_by("date", true)
            .range(RowRange::first(UPCOMING_LIMIT));
        let rows = self
            .store
            .select(query)
            .await
            .inspect_err(|err| warn!(error = %err, "upcoming events query failed"))?;
        Ok(rows.rows)
    }

    fn begin_mutation(&self) {
        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });
    }

    fn record_failure(&self, operation: &'static str, err: &ClientError) {
        error!(operation, error = %err, "event operation failed");
        self.state.send_modify(|state| {
            state.loading = false;
            state.error = Some(err.to_string());
        });
    }
}

fn prepare_new_event(owner_id: &str, draft: EventDraft, today: NaiveDate) -> ClientResult<NewEvent> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(ClientError::Unauthorized);
    }
    let draft = draft.validate(today)?;
    Ok(NewEvent::from_draft(draft, owner_id))
}
