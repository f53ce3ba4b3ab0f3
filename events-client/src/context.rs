use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::backend::{AuthBackend, EventStore};
use crate::error::{ClientError, ClientResult};
use crate::event::{Event, EventDraft};
use crate::repository::{DEFAULT_PAGE_SIZE, EventRepository};
use crate::session::{AuthListener, AuthStatus, DEFAULT_CHECK_TIMEOUT, SessionManager};

/// Параметры [`AppContext`].
#[derive(Debug, Clone, Copy)]
pub struct AppOptions {
    /// Размер страницы ленты.
    pub page_size: u32,
    /// Предел ожидания при проверке сессии.
    pub auth_check_timeout: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            auth_check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

/// Состояние приложения: сессия и лента событий поверх одного бэкенда.
///
/// Создаётся корнем приложения; [`AppContext::start`] проверяет сессию и
/// подписывается на её изменения, [`AppContext::shutdown`] отписывается.
pub struct AppContext<B: AuthBackend + EventStore> {
    session: SessionManager<B>,
    events: EventRepository<B>,
    listener: Option<AuthListener>,
}

impl<B: AuthBackend + EventStore> AppContext<B> {
    /// Создаёт контекст; до [`AppContext::start`] сессия не проверена.
    pub fn new(backend: Arc<B>, options: AppOptions) -> Self {
        Self {
            session: SessionManager::new(Arc::clone(&backend))
                .with_check_timeout(options.auth_check_timeout),
            events: EventRepository::with_page_size(backend, options.page_size),
            listener: None,
        }
    }

    /// Менеджер сессии.
    pub fn session(&self) -> &SessionManager<B> {
        &self.session
    }

    /// Лента событий.
    pub fn events(&self) -> &EventRepository<B> {
        &self.events
    }

    /// Активна ли подписка на изменения сессии.
    pub fn is_listening(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| listener.is_active())
    }

    /// Проверяет сохранённую сессию и подписывается на её изменения.
    pub async fn start(&mut self) -> AuthStatus {
        let status = self.session.check_auth().await;
        if self.listener.is_none() {
            self.listener = Some(self.session.init_auth_listener());
        }
        info!(?status, "application context started");
        status
    }

    /// Отписывается от уведомлений и очищает ленту.
    pub fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.unsubscribe();
        }
        self.events.reset();
        info!("application context stopped");
    }

    /// Создаёт событие от имени вошедшего пользователя.
    pub async fn create_event(&self, draft: EventDraft) -> ClientResult<Event> {
        let owner_id = self
            .session
            .current_user_id()
            .ok_or(ClientError::Unauthorized)?;
        self.events.create_event(&owner_id, draft).await
    }

    /// События вошедшего пользователя.
    pub async fn my_events(&self) -> ClientResult<Vec<Event>> {
        let owner_id = self
            .session
            .current_user_id()
            .ok_or(ClientError::Unauthorized)?;
        self.events.events_by_owner(&owner_id).await
    }
}
