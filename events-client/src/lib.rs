//! Клиентская библиотека приложения событий поверх Supabase.
//!
//! Состоит из двух частей, которые разделяют один бэкенд:
//! - `SessionManager` хранит состояние аутентификации и следит за
//!   уведомлениями бэкенда о смене сессии;
//! - `EventRepository` ведёт ленту событий с постраничной подгрузкой и
//!   выполняет запросы к коллекции `events`.
//!
//! `AppContext` собирает обе части и управляет их жизненным циклом.
//! Сетевая реализация бэкенда (`SupabaseBackend`) работает по HTTP
//! (`reqwest`) с эндпоинтами GoTrue и PostgREST.
#![warn(missing_docs)]

mod backend;
mod context;
mod error;
mod event;
mod http_client;
mod models;
mod repository;
mod session;
mod settings;
mod validation;

pub use backend::{AuthBackend, EventQuery, EventStore, Filter, Order, RowRange, Rows};
pub use context::{AppContext, AppOptions};
pub use error::{ClientError, ClientResult};
pub use event::{Category, Event, EventDraft, EventPatch, NewEvent, ParseCategoryError};
pub use http_client::{SupabaseBackend, SupabaseConfig};
pub use models::{
    AuthChangeEvent, AuthStateChange, ProfileMetadata, Session, SignUpOutcome, User,
};
pub use repository::{
    DEFAULT_PAGE_SIZE, EventRepository, EventsPage, FetchOutcome, PageState, UPCOMING_LIMIT,
};
pub use session::{AuthListener, AuthState, AuthStatus, DEFAULT_CHECK_TIMEOUT, SessionManager};
pub use settings::ClientSettings;
pub use validation::{LoginForm, RegistrationForm, validate_event_form, validate_event_patch};
