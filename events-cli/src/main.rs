mod logging;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use events_client::{
    AppContext, AuthStatus, Category, ClientError, ClientSettings, Event, EventDraft, EventPatch,
    FetchOutcome, LoginForm, PageState, RegistrationForm, Session, SupabaseBackend,
    validate_event_form, validate_event_patch,
};
use tracing::debug;

const SESSION_FILE: &str = ".events_session";

#[derive(Debug, Parser)]
#[command(name = "events-cli", version, about = "CLI клиент для ленты событий")]
struct Cli {
    /// Файл, в котором хранится сессия между запусками.
    #[arg(long, global = true, default_value = SESSION_FILE)]
    session_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Регистрация пользователя.
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Повтор пароля; по умолчанию совпадает с `--password`.
        #[arg(long)]
        confirm_password: Option<String>,
    },
    /// Вход пользователя.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Выход и удаление сохранённой сессии.
    Logout,
    /// Текущий пользователь.
    Whoami,
    /// Лента событий, новые сверху.
    Feed {
        /// Сколько страниц загрузить.
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Событие по id.
    Get {
        #[arg(long)]
        id: String,
    },
    /// Создание события (требует входа).
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        /// Дата в формате YYYY-MM-DD.
        #[arg(long)]
        date: NaiveDate,
        /// Время в формате HH:MM.
        #[arg(long)]
        time: NaiveTime,
        #[arg(long)]
        location: String,
        #[arg(long)]
        category: Category,
        #[arg(long)]
        max_participants: u32,
        #[arg(long, default_value_t = 0.0)]
        price: f64,
    },
    /// Обновление события; меняются только переданные поля.
    Update {
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        time: Option<NaiveTime>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        max_participants: Option<u32>,
        #[arg(long)]
        price: Option<f64>,
    },
    /// Удаление события.
    Delete {
        #[arg(long)]
        id: String,
    },
    /// События текущего пользователя.
    Mine,
    /// Ближайшие события.
    Upcoming,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Ошибка: {err:#}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = ClientSettings::from_env().context("не удалось прочитать настройки")?;
    logging::init_logging(&settings.log_level)?;

    let backend =
        Arc::new(SupabaseBackend::new(settings.supabase_config()).map_err(map_client_error)?);
    if let Some(session) = load_session(&cli.session_file)
        .with_context(|| format!("не удалось прочитать {}", cli.session_file.display()))?
    {
        backend.restore_session(session);
    }

    let mut context = AppContext::new(Arc::clone(&backend), settings.app_options());
    let status = context.start().await;
    debug!(?status, "session restored");

    let result = execute(&context, cli.command).await;

    persist_session(&cli.session_file, backend.current_session())
        .context("не удалось сохранить сессию")?;
    context.shutdown();
    result
}

async fn execute(context: &AppContext<SupabaseBackend>, command: Command) -> Result<()> {
    let session = context.session();
    let events = context.events();

    match command {
        Command::Register {
            first_name,
            last_name,
            email,
            password,
            confirm_password,
        } => {
            let form = RegistrationForm {
                first_name,
                last_name,
                email,
                confirm_password: confirm_password.unwrap_or_else(|| password.clone()),
                password,
            }
            .validated()
            .map_err(map_client_error)?;

            let outcome = session
                .sign_up(&form.email, &form.password, &form.profile())
                .await
                .map_err(map_client_error)?;
            if outcome.is_pending_confirmation() {
                println!("Регистрация успешна, подтвердите email и выполните вход");
            } else {
                println!("Регистрация успешна, выполните вход");
            }
            println!("user: {} ({})", outcome.user.display_name(), outcome.user.id);
        }
        Command::Login { email, password } => {
            let form = LoginForm { email, password }
                .validated()
                .map_err(map_client_error)?;
            let user = session
                .sign_in(&form.email, &form.password)
                .await
                .map_err(map_client_error)?;
            println!("Вход выполнен: {} ({})", user.display_name(), user.id);
        }
        Command::Logout => {
            session.sign_out().await.map_err(map_client_error)?;
            println!("Выход выполнен");
        }
        Command::Whoami => {
            let state = session.state();
            match (state.status, state.user) {
                (AuthStatus::Authenticated, Some(user)) => {
                    println!("user: {}", user.display_name());
                    println!("  id: {}", user.id);
                    if let Some(email) = user.email {
                        println!("  email: {email}");
                    }
                }
                _ => println!("Вход не выполнен"),
            }
        }
        Command::Feed { pages } => {
            for _ in 0..pages {
                let outcome = events.load_more().await.map_err(map_client_error)?;
                if outcome == FetchOutcome::Skipped {
                    break;
                }
            }
            print_feed(&events.state());
        }
        Command::Get { id } => {
            let event = events.get_event_by_id(&id).await.map_err(map_client_error)?;
            print_event("Событие", &event);
        }
        Command::Create {
            title,
            description,
            date,
            time,
            location,
            category,
            max_participants,
            price,
        } => {
            let draft = EventDraft {
                title,
                description,
                date,
                time,
                location,
                category,
                max_participants,
                price,
            };
            validate_event_form(&draft, Utc::now().date_naive()).map_err(map_client_error)?;

            let event = context
                .create_event(draft)
                .await
                .map_err(map_client_error)?;
            print_event("Событие создано", &event);
        }
        Command::Update {
            id,
            title,
            description,
            date,
            time,
            location,
            category,
            max_participants,
            price,
        } => {
            let patch = EventPatch {
                title,
                description,
                date,
                time,
                location,
                category,
                max_participants,
                price,
            };
            validate_event_patch(&patch, Utc::now().date_naive()).map_err(map_client_error)?;

            let event = events
                .update_event(&id, patch)
                .await
                .map_err(map_client_error)?;
            print_event("Событие обновлено", &event);
        }
        Command::Delete { id } => {
            events.delete_event(&id).await.map_err(map_client_error)?;
            println!("Событие удалено: id={id}");
        }
        Command::Mine => {
            let mine = context.my_events().await.map_err(map_client_error)?;
            print_list("Мои события", &mine);
        }
        Command::Upcoming => {
            let upcoming = events.upcoming_events().await.map_err(map_client_error)?;
            print_list("Ближайшие события", &upcoming);
        }
    }

    Ok(())
}

fn parse_session_content(raw: &str) -> Result<Option<Session>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let session = serde_json::from_str(raw).context("повреждённый файл сессии")?;
    Ok(Some(session))
}

fn load_session(path: &Path) -> Result<Option<Session>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)?;
    parse_session_content(&raw)
}

fn persist_session(path: &Path, session: Option<Session>) -> Result<()> {
    match session {
        Some(session) => {
            let raw = serde_json::to_string_pretty(&session)?;
            fs::write(path, raw)?;
        }
        None => match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        },
    }
    Ok(())
}

fn map_client_error(err: ClientError) -> anyhow::Error {
    let message = match err {
        ClientError::Unauthorized => {
            "требуется авторизация: выполните `events-cli login ...`".to_string()
        }
        ClientError::NotFound => "событие не найдено".to_string(),
        ClientError::InvalidRequest(message) => format!("некорректный запрос: {message}"),
        ClientError::Validation { field, message } => {
            format!("некорректное значение поля {field}: {message}")
        }
        ClientError::Form(errors) => format!("некорректные данные формы: {errors}"),
        ClientError::Decode(message) => format!("неожиданный ответ бэкенда: {message}"),
        ClientError::Http(err) => format!("ошибка HTTP: {err}"),
    };
    anyhow::anyhow!(message)
}

fn print_event(title: &str, event: &Event) {
    println!("{title}");
    println!("id: {}", event.id);
    println!("title: {}", event.title);
    println!("description: {}", event.description);
    println!("when: {} {}", event.date, event.time.format("%H:%M"));
    println!("location: {}", event.location);
    println!("category: {}", event.category);
    println!(
        "participants: {}/{}",
        event.current_participants, event.max_participants
    );
    if event.is_free() {
        println!("price: бесплатно");
    } else {
        println!("price: {:.2}", event.price);
    }
    println!("user_id: {}", event.user_id);
    println!("created_at: {}", event.created_at);
}

fn print_list(title: &str, events: &[Event]) {
    println!("{title}: {}", events.len());
    for event in events {
        print_row(event);
    }
}

fn print_feed(state: &PageState) {
    let total = state
        .total_count
        .map_or_else(|| "?".to_string(), |total| total.to_string());
    println!(
        "Событий: {} из {} (страница {}, ещё есть: {})",
        state.events.len(),
        total,
        state.current_page,
        if state.has_more { "да" } else { "нет" }
    );
    for event in &state.events {
        print_row(event);
    }
}

fn print_row(event: &Event) {
    println!(
        "- [{}] {} {} {} ({}, {})",
        event.id,
        event.date,
        event.time.format("%H:%M"),
        event.title,
        event.category,
        event.location
    );
}
