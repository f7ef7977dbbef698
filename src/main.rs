use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tab_session::clock::{Clock, SystemClock};
use tab_session::config::SessionConfig;
use tab_session::cookie::{CookieJar, FileCookieJar};
use tab_session::event_loop::EventLoop;
use tab_session::paths;
use tab_session::session::codec::decode;
use tab_session::session::state::{COOKIE_ACCESS_DELAY, SESSION_COOKIE_NAME};
use tab_session::session::{is_active_session, SessionEnv, SessionStore};
use tab_session::structured_logger::StructuredLogger;

#[derive(Parser)]
#[command(name = "tab-session")]
#[command(about = "Session lifecycle shared by independent processes through one cookie jar")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("TAB_SESSION_GIT_SHA"), ")"))]
struct Cli {
    /// Config file (defaults to ~/.tab-session/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cookie jar file (defaults to ~/.tab-session/cookies.json)
    #[arg(long, global = true)]
    jar: Option<PathBuf>,

    /// Host name the cookie belongs to
    #[arg(long, global = true, default_value = "localhost")]
    host: String,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one tab until interrupted, printing renew and expire events as JSON lines
    Run {
        /// Identifies this tab in monitoring logs (random by default)
        #[arg(long)]
        tab_id: Option<String>,

        /// Interval between simulated user activity
        #[arg(long, default_value = "2000")]
        activity_ms: u64,

        /// Only watch the session, never expand or renew it
        #[arg(long)]
        passive: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Print the decoded session cookie
    Show,
    /// Delete the session cookie
    Clear {
        /// Delete every cookie in the jar
        #[arg(long)]
        all: bool,
    },
}

#[derive(Clone, Copy)]
enum TabEvent {
    Renew,
    Expire,
}

impl TabEvent {
    fn name(self) -> &'static str {
        match self {
            Self::Renew => "renew",
            Self::Expire => "expire",
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("tab_session={}", level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => paths::config_path()?,
    };
    let config = SessionConfig::load_or_default(&config_path)?;
    let jar_path = match &cli.jar {
        Some(path) => path.clone(),
        None => paths::cookie_jar_path()?,
    };
    let clock: Rc<dyn Clock> = Rc::new(SystemClock);
    let jar = FileCookieJar::new(jar_path, Rc::clone(&clock));

    match cli.command {
        Command::Run {
            tab_id,
            activity_ms,
            passive,
            duration_secs,
        } => {
            let tab_id = tab_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let options = TabOptions {
                tab_id,
                activity: (!passive).then(|| Duration::from_millis(activity_ms.max(1))),
                duration: duration_secs.map(Duration::from_secs),
            };
            run_tab(&config, &cli.host, jar, clock, options).await
        }
        Command::Show => show(&jar, clock.as_ref()),
        Command::Clear { all } => {
            if all {
                jar.clear_all()?;
            } else {
                jar.set(SESSION_COOKIE_NAME, "", 0, &config.cookie_options(&cli.host));
            }
            Ok(())
        }
    }
}

struct TabOptions {
    tab_id: String,
    activity: Option<Duration>,
    duration: Option<Duration>,
}

async fn run_tab(
    config: &SessionConfig,
    host: &str,
    jar: FileCookieJar,
    clock: Rc<dyn Clock>,
    options: TabOptions,
) -> Result<()> {
    let logs_dir = paths::logs_dir()?;
    let monitoring = StructuredLogger::new(&options.tab_id, &logs_dir)
        .with_context(|| format!("Failed to open monitoring log in {}", logs_dir.display()))?;
    let event_loop = EventLoop::new(clock);

    let store = SessionStore::start(
        config.store_options(host),
        SessionEnv {
            jar: Rc::new(jar),
            event_loop: event_loop.clone(),
            monitoring: Rc::new(monitoring),
        },
    )?;
    tracing::info!(tab = %options.tab_id, product_key = store.product_key(), "tab started");

    let events: Rc<RefCell<Vec<TabEvent>>> = Rc::new(RefCell::new(Vec::new()));
    for (observable, event) in [
        (store.renew_observable(), TabEvent::Renew),
        (store.expire_observable(), TabEvent::Expire),
    ] {
        let events = Rc::clone(&events);
        observable.subscribe(move |_| events.borrow_mut().push(event));
    }

    let mut activity = tokio::time::interval(
        options
            .activity
            .unwrap_or(Duration::from_millis(COOKIE_ACCESS_DELAY)),
    );
    let started = tokio::time::Instant::now();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let wait_ms = event_loop
            .next_deadline()
            .map(|deadline| deadline.saturating_sub(event_loop.now_ms()))
            .unwrap_or(COOKIE_ACCESS_DELAY);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {
                event_loop.run_due();
            }
            _ = activity.tick(), if options.activity.is_some() => {
                store.expand_or_renew_session();
            }
            result = &mut ctrl_c => {
                result.context("Failed to listen for ctrl-c")?;
                break;
            }
        }

        let drained: Vec<TabEvent> = events.borrow_mut().drain(..).collect();
        for event in drained {
            let line = json!({
                "tab": options.tab_id,
                "event": event.name(),
                "at": event_loop.now_ms(),
                "session": store.get_session(),
            });
            println!("{}", line);
        }

        if options
            .duration
            .is_some_and(|duration| started.elapsed() >= duration)
        {
            break;
        }
    }

    store.stop();
    tracing::info!(tab = %options.tab_id, "tab stopped");
    Ok(())
}

fn show(jar: &FileCookieJar, clock: &dyn Clock) -> Result<()> {
    let raw = jar.get(SESSION_COOKIE_NAME);
    let session = decode(raw.as_deref());
    let report = json!({
        "jar": jar.path(),
        "cookie": raw,
        "active": !session.is_empty() && is_active_session(&session, clock.now_ms()),
        "session": session,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
