//! Состояние аутентификации приложения.
//!
//! `SessionManager` хранит текущую сессию в `watch`-канале: потребители
//! берут снимок через [`SessionManager::state`] или подписываются на
//! изменения через [`SessionManager::subscribe`]. Менять состояние может
//! только сам менеджер.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::backend::AuthBackend;
use crate::error::ClientResult;
use crate::models::{ProfileMetadata, Session, SignUpOutcome, User};

/// Сколько ждать ответа бэкенда при проверке сессии на старте.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Стадия аутентификации.
pub enum AuthStatus {
    /// Проверка ещё не запускалась.
    #[default]
    Uninitialized,
    /// Идёт проверка сохранённой сессии.
    Checking,
    /// Есть действующая сессия.
    Authenticated,
    /// Сессии нет.
    Unauthenticated,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Снимок состояния аутентификации.
pub struct AuthState {
    /// Стадия.
    pub status: AuthStatus,
    /// Текущая сессия.
    pub session: Option<Session>,
    /// Текущий пользователь.
    pub user: Option<User>,
    /// Идёт проверка сессии.
    pub loading: bool,
}

impl AuthState {
    fn from_session(session: Option<Session>) -> Self {
        let status = if session.is_some() {
            AuthStatus::Authenticated
        } else {
            AuthStatus::Unauthenticated
        };
        let user = session.as_ref().map(|session| session.user.clone());

        Self {
            status,
            session,
            user,
            loading: false,
        }
    }

    /// Есть ли действующая сессия.
    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }
}

/// Владелец состояния аутентификации.
pub struct SessionManager<A: AuthBackend> {
    backend: Arc<A>,
    state: Arc<watch::Sender<AuthState>>,
    check_timeout: Duration,
}

impl<A: AuthBackend> SessionManager<A> {
    /// Создаёт менеджер в состоянии `Uninitialized`.
    pub fn new(backend: Arc<A>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            backend,
            state: Arc::new(state),
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    /// Меняет предел ожидания для [`Self::check_auth`].
    pub fn with_check_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }

    /// Снимок текущего состояния.
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Подписка на изменения состояния.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Идентификатор вошедшего пользователя.
    pub fn current_user_id(&self) -> Option<String> {
        self.state.borrow().user.as_ref().map(|user| user.id.clone())
    }

    /// Проверяет, есть ли у бэкенда сохранённая сессия.
    ///
    /// Запрос ограничен `check_timeout`; ошибка бэкенда и истечение времени
    /// одинаково приводят к `Unauthenticated`. Флаг `loading` сбрасывается
    /// при любом исходе.
    pub async fn check_auth(&self) -> AuthStatus {
        self.state.send_modify(|state| {
            state.status = AuthStatus::Checking;
            state.loading = true;
        });

        let next = match timeout(self.check_timeout, self.backend.get_session()).await {
            Ok(Ok(session)) => AuthState::from_session(session),
            Ok(Err(err)) => {
                error!(error = %err, "auth session check failed");
                AuthState::from_session(None)
            }
            Err(_) => {
                warn!(timeout = ?self.check_timeout, "auth session check timed out");
                AuthState::from_session(None)
            }
        };

        let status = next.status;
        self.state.send_replace(next);
        status
    }

    /// Вход по email и паролю. При успехе сохраняет сессию.
    pub async fn sign_in(&self, email: &str, password: &str) -> ClientResult<User> {
        let session = self
            .backend
            .sign_in_with_password(email, password)
            .await
            .inspect_err(|err| error!(error = %err, "sign in failed"))?;

        let user = session.user.clone();
        self.state.send_replace(AuthState::from_session(Some(session)));
        Ok(user)
    }

    /// Регистрация с профилем.
    ///
    /// Состояние сессии не меняется, даже если бэкенд сразу выдал сессию:
    /// аккаунт может требовать подтверждения, и вход остаётся явным шагом.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: &ProfileMetadata,
    ) -> ClientResult<SignUpOutcome> {
        self.backend
            .sign_up(email, password, profile)
            .await
            .inspect_err(|err| error!(error = %err, "sign up failed"))
    }

    /// Выход. Локальная сессия очищается независимо от ответа бэкенда.
    pub async fn sign_out(&self) -> ClientResult<()> {
        let result = self.backend.sign_out().await;

        self.state.send_modify(|state| {
            state.status = AuthStatus::Unauthenticated;
            state.session = None;
            state.user = None;
        });

        result.inspect_err(|err| error!(error = %err, "sign out failed"))
    }

    /// Подписывается на уведомления бэкенда об изменении сессии.
    ///
    /// Каждое уведомление целиком заменяет сессию и пользователя. Подписка
    /// живёт, пока жив возвращённый [`AuthListener`]. Требует запущенного
    /// tokio runtime.
    pub fn init_auth_listener(&self) -> AuthListener {
        let mut changes = self.backend.on_auth_state_change();
        let state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        debug!(event = ?change.event, "auth state changed");
                        state.send_replace(AuthState::from_session(change.session));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth listener lagged behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        AuthListener { task }
    }
}

/// Активная подписка на уведомления о сессии.
///
/// Отписка происходит в [`AuthListener::unsubscribe`] или при drop.
#[derive(Debug)]
pub struct AuthListener {
    task: JoinHandle<()>,
}

impl AuthListener {
    /// Подписка ещё обрабатывает уведомления.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Прекращает обработку уведомлений.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for AuthListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::{AuthStatus, SessionManager};
    use crate::backend::AuthBackend;
    use crate::error::{ClientError, ClientResult};
    use crate::models::{
        AuthChangeEvent, AuthStateChange, ProfileMetadata, Session, SignUpOutcome, User,
    };

    struct FakeAuthBackend {
        stored_session: Mutex<Option<Session>>,
        failure: Mutex<Option<String>>,
        get_session_delay: Mutex<Duration>,
        sign_up_session: Mutex<Option<Session>>,
        sign_out_calls: Mutex<u32>,
        changes: broadcast::Sender<AuthStateChange>,
    }

    impl FakeAuthBackend {
        fn new() -> Self {
            let (changes, _) = broadcast::channel(16);
            Self {
                stored_session: Mutex::new(None),
                failure: Mutex::new(None),
                get_session_delay: Mutex::new(Duration::ZERO),
                sign_up_session: Mutex::new(None),
                sign_out_calls: Mutex::new(0),
                changes,
            }
        }

        fn with_session(self, session: Session) -> Self {
            *self.stored_session.lock().expect("session mutex poisoned") = Some(session);
            self
        }

        fn failing(self, message: &str) -> Self {
            *self.failure.lock().expect("failure mutex poisoned") = Some(message.to_string());
            self
        }

        fn check_failure(&self) -> ClientResult<()> {
            match self.failure.lock().expect("failure mutex poisoned").clone() {
                Some(message) => Err(ClientError::InvalidRequest(message)),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl AuthBackend for FakeAuthBackend {
        async fn get_session(&self) -> ClientResult<Option<Session>> {
            let delay = *self.get_session_delay.lock().expect("delay mutex poisoned");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.check_failure()?;
            Ok(self
                .stored_session
                .lock()
                .expect("session mutex poisoned")
                .clone())
        }

        async fn sign_in_with_password(
            &self,
            email: &str,
            _password: &str,
        ) -> ClientResult<Session> {
            self.check_failure()?;
            Ok(sample_session("u-1", email))
        }

        async fn sign_up(
            &self,
            email: &str,
            _password: &str,
            profile: &ProfileMetadata,
        ) -> ClientResult<SignUpOutcome> {
            self.check_failure()?;
            let mut user = sample_user("u-new", email);
            user.user_metadata = profile.clone();
            Ok(SignUpOutcome {
                user,
                session: self
                    .sign_up_session
                    .lock()
                    .expect("sign up session mutex poisoned")
                    .clone(),
            })
        }

        async fn sign_out(&self) -> ClientResult<()> {
            *self.sign_out_calls.lock().expect("sign out mutex poisoned") += 1;
            self.check_failure()
        }

        fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange> {
            self.changes.subscribe()
        }
    }

    #[tokio::test]
    async fn check_auth_restores_existing_session() {
        let backend = Arc::new(FakeAuthBackend::new().with_session(sample_session("u-1", "a@b.io")));
        let manager = SessionManager::new(backend);

        let status = manager.check_auth().await;

        assert_eq!(status, AuthStatus::Authenticated);
        let state = manager.state();
        assert!(!state.loading);
        assert_eq!(manager.current_user_id().as_deref(), Some("u-1"));
    }

    #[tokio::test]
    async fn check_auth_without_session_is_unauthenticated() {
        let manager = SessionManager::new(Arc::new(FakeAuthBackend::new()));

        assert_eq!(manager.check_auth().await, AuthStatus::Unauthenticated);
        assert!(manager.state().session.is_none());
        assert!(!manager.state().loading);
    }

    #[tokio::test]
    async fn check_auth_backend_error_falls_back_to_unauthenticated() {
        let backend = Arc::new(
            FakeAuthBackend::new()
                .with_session(sample_session("u-1", "a@b.io"))
                .failing("backend unavailable"),
        );
        let manager = SessionManager::new(backend);

        assert_eq!(manager.check_auth().await, AuthStatus::Unauthenticated);
        let state = manager.state();
        assert!(state.user.is_none());
        assert!(!state.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn check_auth_gives_up_after_timeout() {
        let backend = FakeAuthBackend::new().with_session(sample_session("u-1", "a@b.io"));
        *backend
            .get_session_delay
            .lock()
            .expect("delay mutex poisoned") = Duration::from_secs(30);
        let manager = SessionManager::new(Arc::new(backend));

        let started = tokio::time::Instant::now();
        let status = manager.check_auth().await;

        assert_eq!(status, AuthStatus::Unauthenticated);
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(!manager.state().loading);
    }

    #[tokio::test]
    async fn sign_in_stores_session_and_user() {
        let manager = SessionManager::new(Arc::new(FakeAuthBackend::new()));

        let user = manager
            .sign_in("a@b.io", "secret1")
            .await
            .expect("sign in must succeed");

        assert_eq!(user.email.as_deref(), Some("a@b.io"));
        let state = manager.state();
        assert!(state.is_authenticated());
        assert_eq!(
            state.session.map(|session| session.access_token).as_deref(),
            Some("token-u-1")
        );
    }

    #[tokio::test]
    async fn sign_in_failure_is_returned_and_state_untouched() {
        let manager =
            SessionManager::new(Arc::new(FakeAuthBackend::new().failing("Invalid login credentials")));

        let err = manager
            .sign_in("a@b.io", "wrong")
            .await
            .expect_err("sign in must fail");

        assert!(matches!(err, ClientError::InvalidRequest(message) if message == "Invalid login credentials"));
        assert_eq!(manager.state().status, AuthStatus::Uninitialized);
    }

    #[tokio::test]
    async fn sign_up_pending_confirmation_stays_unauthenticated() {
        let manager = SessionManager::new(Arc::new(FakeAuthBackend::new()));
        manager.check_auth().await;

        let outcome = manager
            .sign_up("new@b.io", "secret1", &ProfileMetadata::new("Ada", "Lovelace"))
            .await
            .expect("sign up must succeed");

        assert!(outcome.is_pending_confirmation());
        assert_eq!(outcome.user.display_name(), "Ada Lovelace");
        assert_eq!(manager.state().status, AuthStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn sign_up_with_immediate_session_does_not_sign_in() {
        let backend = FakeAuthBackend::new();
        *backend
            .sign_up_session
            .lock()
            .expect("sign up session mutex poisoned") = Some(sample_session("u-new", "new@b.io"));
        let manager = SessionManager::new(Arc::new(backend));

        let outcome = manager
            .sign_up("new@b.io", "secret1", &ProfileMetadata::default())
            .await
            .expect("sign up must succeed");

        assert!(!outcome.is_pending_confirmation());
        assert!(manager.state().session.is_none());
    }

    #[tokio::test]
    async fn sign_out_clears_state_even_when_backend_fails() {
        let backend = Arc::new(FakeAuthBackend::new());
        let manager = SessionManager::new(Arc::clone(&backend));
        manager
            .sign_in("a@b.io", "secret1")
            .await
            .expect("sign in must succeed");

        *backend.failure.lock().expect("failure mutex poisoned") = Some("network down".to_string());
        let result = manager.sign_out().await;

        assert!(result.is_err());
        assert_eq!(*backend.sign_out_calls.lock().expect("sign out mutex poisoned"), 1);
        let state = manager.state();
        assert_eq!(state.status, AuthStatus::Unauthenticated);
        assert!(state.session.is_none());
        assert!(state.user.is_none());
    }

    #[tokio::test]
    async fn listener_applies_pushed_changes() {
        let backend = Arc::new(FakeAuthBackend::new());
        let manager = SessionManager::new(Arc::clone(&backend));
        let mut updates = manager.subscribe();
        let listener = manager.init_auth_listener();

        backend
            .changes
            .send(AuthStateChange {
                event: AuthChangeEvent::SignedIn,
                session: Some(sample_session("u-7", "seven@b.io")),
            })
            .expect("listener must be subscribed");
        tokio::time::timeout(Duration::from_secs(1), updates.changed())
            .await
            .expect("state must change")
            .expect("sender alive");
        assert_eq!(manager.current_user_id().as_deref(), Some("u-7"));

        backend
            .changes
            .send(AuthStateChange {
                event: AuthChangeEvent::SignedOut,
                session: None,
            })
            .expect("listener must be subscribed");
        tokio::time::timeout(Duration::from_secs(1), updates.changed())
            .await
            .expect("state must change")
            .expect("sender alive");

        let state = manager.state();
        assert_eq!(state.status, AuthStatus::Unauthenticated);
        assert!(!state.loading);
        assert!(listener.is_active());
    }

    #[tokio::test]
    async fn unsubscribed_listener_ignores_changes() {
        let backend = Arc::new(FakeAuthBackend::new());
        let manager = SessionManager::new(Arc::clone(&backend));
        let listener = manager.init_auth_listener();

        listener.unsubscribe();
        let _ = backend.changes.send(AuthStateChange {
            event: AuthChangeEvent::SignedIn,
            session: Some(sample_session("u-7", "seven@b.io")),
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(manager.state().status, AuthStatus::Uninitialized);
        assert!(manager.current_user_id().is_none());
    }

    fn sample_user(id: &str, email: &str) -> User {
        User {
            id: id.to_string(),
            email: Some(email.to_string()),
            user_metadata: ProfileMetadata::default(),
            created_at: None,
        }
    }

    fn sample_session(user_id: &str, email: &str) -> Session {
        Session {
            access_token: format!("token-{user_id}"),
            refresh_token: Some(format!("refresh-{user_id}")),
            token_type: "bearer".to_string(),
            expires_at: None,
            user: sample_user(user_id, email),
        }
    }
}
