//! Dashboard proxy session: login, cookie parsing and background renewal.
//!
//! The credential lives in a [`SessionHandle`], an atomically swapped slot
//! shared by every probe executor. Only the [`SessionManager`] writes to it,
//! first synchronously at startup and then from its refresh task, which
//! sleeps for the credential window and logs in again.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwapOption;
use regex::Regex;
use reqwest::header::SET_COOKIE;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GrafanaConfig;
use crate::export::health::HealthMetrics;

/// Shortest credential window honoured; shorter or unreadable windows are
/// raised to this.
pub const MIN_SESSION_TTL: Duration = Duration::from_secs(5);

static SESSION_COOKIE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(grafana_session=[^;]*)").expect("static session cookie pattern")
});

static MAX_AGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Max-Age=([^;]*)").expect("static max-age pattern"));

/// Login failures.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("login request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("login rejected with HTTP status {0}")]
    Status(u16),

    #[error("login response carried no session cookie")]
    MissingCookie,

    #[error("unrecognised session cookie: {0}")]
    MalformedCookie(String),
}

impl SessionError {
    /// The dashboard refused the credentials themselves.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Status(401 | 403))
    }
}

/// A session cookie plus the window it stays valid for.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    cookie: String,
    ttl: Duration,
}

impl SessionCredential {
    pub fn new(cookie: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cookie: cookie.into(),
            ttl,
        }
    }

    /// The `grafana_session=<token>` pair, ready for a `Cookie` header.
    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("cookie", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Extracts the session cookie and its window from one `Set-Cookie` value.
///
/// A missing, non-numeric or too-short `Max-Age` becomes
/// [`MIN_SESSION_TTL`] with a warning.
pub fn parse_session_cookie(header: &str) -> Result<SessionCredential, SessionError> {
    let cookie = SESSION_COOKIE
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| malformed(header))?;

    let max_age = MAX_AGE
        .captures(header)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().trim().parse::<u64>().ok());

    let ttl = match max_age {
        Some(secs) if Duration::from_secs(secs) >= MIN_SESSION_TTL => Duration::from_secs(secs),
        other => {
            warn!(
                max_age = ?other,
                floor_secs = MIN_SESSION_TTL.as_secs(),
                "unexpected session max-age, using floor",
            );
            MIN_SESSION_TTL
        }
    };

    Ok(SessionCredential::new(cookie, ttl))
}

fn malformed(header: &str) -> SessionError {
    // Never echo the token itself.
    let shown = header.split(';').next().unwrap_or_default();
    let name = shown.split('=').next().unwrap_or_default();
    SessionError::MalformedCookie(format!("cookie {name:?}"))
}

/// Exchanges configured credentials for a session.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(
        &self,
    ) -> impl Future<Output = Result<SessionCredential, SessionError>> + Send;
}

#[derive(Serialize)]
struct LoginBody<'a> {
    user: &'a str,
    email: &'a str,
    password: &'a str,
}

/// Logs in through the dashboard's `/login` endpoint.
pub struct GrafanaLogin {
    http: reqwest::Client,
    url: String,
    user: String,
    password: String,
}

impl GrafanaLogin {
    pub fn new(cfg: &GrafanaConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.login_timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            url: format!("{}/login", cfg.url.trim_end_matches('/')),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
        })
    }
}

impl Authenticator for GrafanaLogin {
    async fn authenticate(&self) -> Result<SessionCredential, SessionError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&LoginBody {
                user: &self.user,
                email: "",
                password: &self.password,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::Status(status.as_u16()));
        }

        let header = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.contains("grafana_session="))
            .map(str::to_string)
            .ok_or(SessionError::MissingCookie)?;

        parse_session_cookie(&header)
    }
}

/// Read side of the current credential, cheap to clone.
#[derive(Clone, Default)]
pub struct SessionHandle(Arc<ArcSwapOption<SessionCredential>>);

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that always holds `cookie`.
    pub fn fixed(cookie: impl Into<String>) -> Self {
        let handle = Self::new();
        handle.install(SessionCredential::new(cookie, MIN_SESSION_TTL));
        handle
    }

    /// The credential installed last, if any login succeeded yet.
    pub fn current(&self) -> Option<Arc<SessionCredential>> {
        self.0.load_full()
    }

    fn install(&self, cred: SessionCredential) {
        self.0.store(Some(Arc::new(cred)));
    }
}

/// Owns the login lifecycle and the refresh task.
pub struct SessionManager<A> {
    auth: Arc<A>,
    handle: SessionHandle,
    health: Option<Arc<HealthMetrics>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<A: Authenticator> SessionManager<A> {
    pub fn new(auth: A, health: Option<Arc<HealthMetrics>>) -> Self {
        Self {
            auth: Arc::new(auth),
            handle: SessionHandle::new(),
            health,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Logs in once and installs the credential. Returns the window after
    /// which the next login is due.
    pub async fn login(&self) -> Result<Duration, SessionError> {
        renew(self.auth.as_ref(), &self.handle, self.health.as_deref()).await
    }

    /// Spawns the background task that logs in again every credential
    /// window, the first time after `first_delay`.
    ///
    /// The task stops when `parent` or [`SessionManager::stop`] cancels it.
    pub fn start_refresh(&mut self, first_delay: Duration, parent: &CancellationToken) {
        self.cancel = parent.child_token();

        let auth = Arc::clone(&self.auth);
        let handle = self.handle.clone();
        let health = self.health.clone();
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            refresh_loop(auth, handle, health, first_delay, cancel).await;
        }));
    }

    /// Stops the refresh task and waits for it to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn renew<A: Authenticator>(
    auth: &A,
    handle: &SessionHandle,
    health: Option<&HealthMetrics>,
) -> Result<Duration, SessionError> {
    match auth.authenticate().await {
        Ok(cred) => {
            let ttl = cred.ttl();
            handle.install(cred);

            if let Some(h) = health {
                h.session_refreshes.with_label_values(&["success"]).inc();
                h.session_ttl_seconds.set(ttl.as_secs_f64());
                h.session_consecutive_failures.set(0.0);
            }

            debug!(ttl_secs = ttl.as_secs(), "session established");

            Ok(ttl)
        }
        Err(e) => {
            if let Some(h) = health {
                h.session_refreshes.with_label_values(&["error"]).inc();
                h.session_consecutive_failures.inc();
            }
            Err(e)
        }
    }
}

async fn refresh_loop<A: Authenticator>(
    auth: Arc<A>,
    handle: SessionHandle,
    health: Option<Arc<HealthMetrics>>,
    first_delay: Duration,
    cancel: CancellationToken,
) {
    let mut delay = first_delay;
    let mut failures = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("session refresh stopped");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match renew(auth.as_ref(), &handle, health.as_deref()).await {
            Ok(ttl) => {
                if failures > 0 {
                    info!(failures, "session refresh recovered");
                }
                failures = 0;
                delay = ttl;
            }
            Err(e) => {
                // Keep the stale credential; try again after the same window.
                failures += 1;
                if e.is_rejection() {
                    error!(
                        error = %e,
                        failures,
                        retry_in_secs = delay.as_secs(),
                        "dashboard rejected the configured credentials, proxied queries fail until a refresh succeeds",
                    );
                } else {
                    warn!(
                        error = %e,
                        failures,
                        retry_in_secs = delay.as_secs(),
                        "session refresh failed",
                    );
                }
            }
        }
    }
}
