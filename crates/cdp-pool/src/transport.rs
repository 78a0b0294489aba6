//! Wire-level command/response loop behind the pool.
//!
//! The pool decides which protocol commands to issue and in what order; the
//! transport only moves them. `ChromiumTransport` launches (or attaches to)
//! a Chromium instance and drives its DevTools websocket, `NoopTransport`
//! stands in when no browser is reachable.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::json;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

use webhelm_core_types::EngineError;

use crate::config::PoolConfig;
use crate::util::extract_ws_url;

const CONTROL_QUEUE_DEPTH: usize = 128;
const EVENT_QUEUE_DEPTH: usize = 512;
/// Keep-alive replies are capped well below the command deadline so a dead
/// socket is noticed quickly.
const KEEPALIVE_REPLY_CAP: Duration = Duration::from_secs(5);

/// Protocol event forwarded out of the transport loop.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Which channel a command rides on.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait BrowserTransport: Send + Sync {
    async fn start(&self) -> Result<(), EngineError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, EngineError>;
}

/// Transport used when no browser executable could be located.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl BrowserTransport for NoopTransport {
    async fn start(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, EngineError> {
        Err(EngineError::internal(format!(
            "no browser transport available for method {method}"
        )))
    }
}

type RuntimeFactory = Arc<
    dyn Fn(PoolConfig) -> BoxFuture<'static, Result<Arc<TransportRuntime>, EngineError>>
        + Send
        + Sync,
>;

/// Chromium-backed transport. The runtime is created lazily and recreated
/// whenever its loop has died, so a crashed browser does not poison the pool.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: PoolConfig,
    state: Arc<OnceCell<Mutex<Option<Arc<TransportRuntime>>>>>,
    factory: RuntimeFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: PoolConfig) -> Self {
        let factory: RuntimeFactory = Arc::new(|cfg: PoolConfig| {
            Box::pin(async move {
                let runtime = TransportRuntime::start(cfg).await?;
                Ok(Arc::new(runtime))
            })
        });

        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
        }
    }

    async fn runtime(&self) -> Result<Arc<TransportRuntime>, EngineError> {
        let cell = self.state.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = cell.lock().await;

        if let Some(runtime) = guard.as_ref() {
            if runtime.is_alive() {
                return Ok(runtime.clone());
            }
        }

        let fresh = (self.factory)(self.cfg.clone()).await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    #[cfg(test)]
    fn with_factory(cfg: PoolConfig, factory: RuntimeFactory) -> Self {
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
        }
    }
}

#[async_trait]
impl BrowserTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), EngineError> {
        let runtime = self.runtime().await?;

        // Discovery feeds target lifecycle events to the pool's event pump.
        runtime
            .dispatch(
                CommandTarget::Browser,
                "Target.setDiscoverTargets",
                json!({ "discover": true }),
                Duration::from_millis(self.cfg.command_deadline_ms),
            )
            .await?;

        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.runtime().await {
            Ok(runtime) => runtime.next_event().await,
            Err(err) => {
                warn!(target: "cdp-pool", ?err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, EngineError> {
        let runtime = self.runtime().await?;
        runtime
            .dispatch(
                target,
                method,
                params,
                Duration::from_millis(self.cfg.command_deadline_ms),
            )
            .await
    }
}

/// One in-flight caller command, paired with its reply slot.
struct CommandRequest {
    target: CommandTarget,
    method: String,
    params: Value,
    reply: oneshot::Sender<Result<Value, EngineError>>,
}

/// A live websocket plus the tasks driving it. Dropping the runtime tears
/// the tasks down and kills a launched browser child.
struct TransportRuntime {
    control_tx: mpsc::Sender<CommandRequest>,
    event_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    pump_task: JoinHandle<()>,
    keepalive_task: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl TransportRuntime {
    async fn start(cfg: PoolConfig) -> Result<Self, EngineError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, Self::attach_url(&url)?)
        } else {
            let browser_cfg = Self::browser_config(&cfg)?;
            Self::launch_browser(browser_cfg).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| EngineError::provider(err.to_string()))?;

        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let alive = Arc::new(AtomicBool::new(true));

        let pump_task = {
            let alive = alive.clone();
            tokio::spawn(async move {
                let outcome = Self::pump(conn, control_rx, event_tx).await;
                alive.store(false, Ordering::Relaxed);
                if let Err(err) = outcome {
                    error!(target: "cdp-pool", ?err, "transport loop terminated with error");
                }
            })
        };

        let keepalive_task = Self::spawn_keepalive(
            control_tx.clone(),
            alive.clone(),
            Duration::from_millis(cfg.heartbeat_interval_ms),
            Duration::from_millis(cfg.command_deadline_ms),
        );

        info!(target: "cdp-pool", url = %ws_url, "chromium connection established");

        Ok(Self {
            control_tx,
            event_rx: Mutex::new(event_rx),
            pump_task,
            keepalive_task,
            child: Mutex::new(child),
            alive,
        })
    }

    #[cfg(test)]
    fn detached_stub() -> (Arc<Self>, Arc<AtomicBool>) {
        let (control_tx, _control_rx) = mpsc::channel(8);
        let (_event_tx, event_rx) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let pump_task = {
            let alive = alive.clone();
            tokio::spawn(async move {
                futures::future::pending::<()>().await;
                alive.store(false, Ordering::Relaxed);
            })
        };

        (
            Arc::new(Self {
                control_tx,
                event_rx: Mutex::new(event_rx),
                pump_task,
                keepalive_task: None,
                child: Mutex::new(None),
                alive: alive.clone(),
            }),
            alive,
        )
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Queue one command and wait for its reply, bounded by `deadline`.
    async fn dispatch(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = CommandRequest {
            target,
            method: method.to_string(),
            params,
            reply: reply_tx,
        };

        self.control_tx
            .send(request)
            .await
            .map_err(|err| EngineError::provider(err.to_string()))?;

        match tokio::time::timeout(deadline, reply_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(EngineError::provider("command response channel closed")),
            Err(_) => Err(EngineError::provider_retriable("command timed out")),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.event_rx.lock().await;
        guard.recv().await
    }

    fn spawn_keepalive(
        sender: mpsc::Sender<CommandRequest>,
        alive: Arc<AtomicBool>,
        cadence: Duration,
        deadline: Duration,
    ) -> Option<JoinHandle<()>> {
        if cadence.as_millis() == 0 {
            return None;
        }

        let reply_deadline = deadline.min(KEEPALIVE_REPLY_CAP);

        Some(tokio::spawn(async move {
            let mut ticker = interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while alive.load(Ordering::Relaxed) {
                ticker.tick().await;

                if !alive.load(Ordering::Relaxed) {
                    break;
                }

                let (reply_tx, reply_rx) = oneshot::channel();
                let probe = CommandRequest {
                    target: CommandTarget::Browser,
                    method: "Browser.getVersion".to_string(),
                    params: Value::Object(Default::default()),
                    reply: reply_tx,
                };

                if sender.send(probe).await.is_err() {
                    debug!(target: "cdp-pool", "keep-alive send failed (channel closed)");
                    break;
                }

                match tokio::time::timeout(reply_deadline, reply_rx).await {
                    Ok(Ok(Ok(_))) => {}
                    Ok(Ok(Err(err))) => {
                        warn!(target: "cdp-pool", ?err, "keep-alive command error");
                        break;
                    }
                    Ok(Err(_)) => {
                        debug!(target: "cdp-pool", "keep-alive reply channel closed");
                        break;
                    }
                    Err(_) => {
                        warn!(target: "cdp-pool", "keep-alive timed out");
                        break;
                    }
                }
            }
        }))
    }

    /// An operator-supplied attach endpoint must parse with a ws or wss
    /// scheme; the string is passed through unmodified.
    fn attach_url(raw: &str) -> Result<String, EngineError> {
        let parsed = Url::parse(raw).map_err(|err| {
            EngineError::provider(format!("invalid websocket url {raw}: {err}"))
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(EngineError::provider(format!(
                "websocket url {raw} must use the ws or wss scheme"
            )));
        }
        Ok(raw.to_string())
    }

    fn browser_config(cfg: &PoolConfig) -> Result<BrowserConfig, EngineError> {
        if cfg.websocket_url.is_some() {
            return Err(EngineError::internal(
                "browser_config requested while websocket_url present",
            ));
        }

        if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
            return Err(EngineError::provider(format!(
                "chrome executable not found at {}; set WEBHELM_CHROME to the full path",
                cfg.executable.display()
            )));
        }

        let profile_dir = if cfg.user_data_dir.is_absolute() {
            cfg.user_data_dir.clone()
        } else {
            let cwd = std::env::current_dir().map_err(|err| {
                EngineError::internal(format!("failed to resolve cwd for user-data-dir: {err}"))
            })?;
            cwd.join(&cfg.user_data_dir)
        };

        if let Some(parent) = profile_dir.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                EngineError::internal(format!("failed to create user-data-dir parent: {err}"))
            })?;
        }
        fs::create_dir_all(&profile_dir).map_err(|err| {
            EngineError::internal(format!("failed to ensure user-data-dir: {err}"))
        })?;

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(cfg.command_deadline_ms))
            .launch_timeout(Duration::from_secs(20));

        if !cfg.headless {
            builder = builder.with_head();
        }

        let sandbox_disabled = matches!(
            std::env::var("WEBHELM_DISABLE_SANDBOX").as_deref(),
            Ok("1") | Ok("true") | Ok("yes") | Ok("on")
        );
        if sandbox_disabled {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-breakpad",
            "--disable-client-side-phishing-detection",
            "--disable-component-update",
            "--disable-default-apps",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--disable-hang-monitor",
            "--disable-popup-blocking",
            "--disable-prompt-on-repost",
            "--disable-sync",
            "--metrics-recording-only",
            "--no-first-run",
            "--no-default-browser-check",
            "--password-store=basic",
            "--remote-allow-origins=*",
            "--use-mock-keychain",
        ];
        if cfg.headless {
            args.push("--headless=new");
            args.push("--hide-scrollbars");
            args.push("--mute-audio");
        }
        builder = builder.args(args);

        if !cfg.executable.as_os_str().is_empty() {
            builder = builder.chrome_executable(cfg.executable.clone());
        }
        builder = builder.user_data_dir(profile_dir);

        builder
            .build()
            .map_err(|err| EngineError::internal(format!("browser config error: {err}")))
    }

    async fn launch_browser(config: BrowserConfig) -> Result<(Option<Child>, String), EngineError> {
        let mut child = config
            .launch()
            .map_err(|err| EngineError::internal(format!("failed to launch chromium: {err}")))?;

        let ws_url = extract_ws_url(&mut child).await?;

        Ok((Some(child), ws_url))
    }

    /// Single loop owning the websocket: callers' requests go out, replies
    /// are matched to their reply slots by call id, events fan out.
    async fn pump(
        mut conn: Connection<CdpEventMessage>,
        mut control_rx: mpsc::Receiver<CommandRequest>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<(), EngineError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, EngineError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(request) = control_rx.recv() => {
                    Self::submit(&mut conn, request, &mut inflight)?;
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::complete(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            if let Err(err) = Self::forward(event, &event_tx).await {
                                warn!(target: "cdp-pool", ?err, "failed to forward event");
                            }
                        }
                        Some(Err(err)) => {
                            let engine_err = Self::map_cdp_error(err);
                            for (_, reply) in inflight.drain() {
                                let _ = reply.send(Err(engine_err.clone()));
                            }
                            return Err(engine_err);
                        }
                        None => {
                            let err = EngineError::provider("cdp connection closed");
                            for (_, reply) in inflight.drain() {
                                let _ = reply.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn submit(
        conn: &mut Connection<CdpEventMessage>,
        request: CommandRequest,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, EngineError>>>,
    ) -> Result<(), EngineError> {
        let session = match request.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = request.method.clone().into();
        match conn.submit_command(method_id, session, request.params) {
            Ok(call_id) => {
                inflight.insert(call_id, request.reply);
                Ok(())
            }
            Err(err) => {
                let engine_err = EngineError::provider(err.to_string());
                let _ = request.reply.send(Err(engine_err.clone()));
                Err(engine_err)
            }
        }
    }

    fn complete(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, EngineError>>>,
    ) {
        let reply = inflight.remove(&resp.id);
        let result = Self::unpack(resp);

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    async fn forward(
        event: CdpEventMessage,
        event_tx: &mpsc::Sender<TransportEvent>,
    ) -> Result<(), EngineError> {
        let raw: CdpJsonEventMessage = event
            .try_into()
            .map_err(|err| EngineError::internal(format!("failed to decode cdp event: {err}")))?;

        let payload = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };

        event_tx
            .send(payload)
            .await
            .map_err(|err| EngineError::internal(err.to_string()))
    }

    fn unpack(resp: Response) -> Result<Value, EngineError> {
        if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(error) = resp.error {
            Err(EngineError::Provider {
                code: Some(error.code),
                hint: error.message,
                retriable: error.code >= 500,
            })
        } else {
            Err(EngineError::internal("empty cdp response"))
        }
    }

    fn map_cdp_error(err: CdpError) -> EngineError {
        let hint = err.to_string();
        match err {
            CdpError::Timeout => EngineError::provider_retriable(hint),
            CdpError::FrameNotFound(_) => EngineError::internal(hint),
            CdpError::JavascriptException(_) => EngineError::internal(hint),
            CdpError::Serde(_) => EngineError::internal(hint),
            CdpError::InvalidMessage(_, _) => EngineError::internal(hint),
            CdpError::Ws(_)
            | CdpError::UnexpectedWsMessage(_)
            | CdpError::Io(_)
            | CdpError::Chrome(_)
            | CdpError::ChromeMessage(_)
            | CdpError::ChannelSendError(_)
            | CdpError::NoResponse
            | CdpError::LaunchExit(_, _)
            | CdpError::LaunchTimeout(_)
            | CdpError::LaunchIo(_, _)
            | CdpError::DecodeError(_)
            | CdpError::ScrollingFailed(_)
            | CdpError::NotFound
            | CdpError::Url(_) => EngineError::provider_retriable(hint),
        }
    }
}

impl Drop for TransportRuntime {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.pump_task.abort();
        if let Some(handle) = &self.keepalive_task {
            handle.abort();
        }

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-pool", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-pool", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}
