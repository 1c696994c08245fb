//! The application orchestrator.
//!
//! ```text
//! Created ──build()──▶ Initialized ──run()──▶ Running ──signal/stop()──▶ Stopping ──▶ Stopped
//!                          │                                                          ▲
//!                          └──── init or invoker failure ─────────────────────────────┘
//! ```

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};

use crate::app::AppInfo;
use crate::cron::Cron;
use crate::error::{BoxError, Error, Result};
use crate::job::{self, Job, JobContext};
use crate::lifecycle::signals::{self, Signal, SignalListener};
use crate::lifecycle::startup::{self, Bootstrap};
use crate::lifecycle::{AppContext, Cycle};
use crate::observability::logging;
use crate::registry::{NoopRegistrar, Registrar};
use crate::server::{OrderServer, Server};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(100);

type HookFuture = Pin<Box<dyn Future<Output = std::result::Result<(), BoxError>> + Send>>;
type Hook = Box<dyn FnOnce() -> HookFuture + Send>;
type Invoker = Box<dyn FnOnce(AppContext) -> HookFuture + Send>;

/// Where the application is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initialized,
    Running,
    Stopping,
    Stopped,
}

/// Options for an [`Ego`]. Building runs the init sequence.
pub struct EgoBuilder {
    hang: bool,
    stop_timeout: Duration,
    order_server_health_timeout: Duration,
    shutdown_signals: Vec<Signal>,
    disable_banner: bool,
    args: Option<Vec<OsString>>,
    registrar: Arc<dyn Registrar>,
    before_stop: Vec<Hook>,
    after_stop: Vec<Hook>,
    invokers: Vec<Invoker>,
}

impl Default for EgoBuilder {
    fn default() -> Self {
        Self {
            hang: false,
            stop_timeout: Duration::from_secs(5),
            order_server_health_timeout: Duration::from_secs(30),
            shutdown_signals: Vec::new(),
            disable_banner: false,
            args: None,
            registrar: Arc::new(NoopRegistrar),
            before_stop: Vec::new(),
            after_stop: Vec::new(),
            invokers: Vec::new(),
        }
    }
}

impl EgoBuilder {
    /// Keep running even when no task was ever launched.
    pub fn hang(mut self, hang: bool) -> Self {
        self.hang = hang;
        self
    }

    /// Bound on each server's graceful stop before it is forced.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn order_server_health_timeout(mut self, timeout: Duration) -> Self {
        self.order_server_health_timeout = timeout;
        self
    }

    /// Signals that stop the application. Empty means SIGTERM, SIGINT, SIGQUIT.
    pub fn shutdown_signals(mut self, signals: impl IntoIterator<Item = Signal>) -> Self {
        self.shutdown_signals = signals.into_iter().collect();
        self
    }

    pub fn disable_banner(mut self) -> Self {
        self.disable_banner = true;
        self
    }

    /// Command line to parse instead of the process arguments.
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn registrar(mut self, registrar: impl Registrar + 'static) -> Self {
        self.registrar = Arc::new(registrar);
        self
    }

    /// Runs when a stop begins, before any server is told to stop.
    pub fn before_stop_clean<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.before_stop.push(Box::new(move || Box::pin(hook())));
        self
    }

    /// Runs exactly once when `run` is about to return, whatever the outcome.
    pub fn after_stop_clean<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.after_stop.push(Box::new(move || Box::pin(hook())));
        self
    }

    /// Runs at the start of `run`, in registration order. A failure ends
    /// the run like an init failure.
    pub fn invoker<F, Fut>(mut self, invoker: F) -> Self
    where
        F: FnOnce(AppContext) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.invokers.push(Box::new(move |ctx| Box::pin(invoker(ctx))));
        self
    }

    /// Run the init sequence and produce the application.
    ///
    /// An init failure is not returned here: `run` reports it after the
    /// after-stop hooks, so cleanup happens on that path too.
    pub fn build(self) -> Ego {
        let mut boot = Bootstrap {
            args: self
                .args
                .unwrap_or_else(|| std::env::args_os().collect()),
            disable_banner: self.disable_banner,
            ctx: AppContext::new(AppInfo::from_env()),
            watcher: None,
        };

        let (init_error, exit_early) = match startup::run_steps(&mut boot) {
            Ok(ControlFlow::Continue(())) => (None, false),
            Ok(ControlFlow::Break(())) => (None, true),
            Err(e) => (Some(e), false),
        };

        Ego {
            inner: Arc::new(Inner {
                ctx: boot.ctx,
                hang: self.hang,
                stop_timeout: self.stop_timeout,
                health_timeout: self.order_server_health_timeout,
                shutdown_signals: self.shutdown_signals,
                registrar: self.registrar,
                init_error: Mutex::new(init_error),
                exit_early,
                watcher: Mutex::new(boot.watcher),
                servers: RwLock::new(Vec::new()),
                order_servers: RwLock::new(Vec::new()),
                crons: RwLock::new(Vec::new()),
                before_stop: Mutex::new(self.before_stop),
                after_stop: Mutex::new(self.after_stop),
                invokers: Mutex::new(self.invokers),
                cycle: Cycle::new(),
                launch_gate: Mutex::new(()),
                state: Mutex::new(State::Initialized),
                stopping: AtomicBool::new(false),
            }),
        }
    }
}

/// An ordered server keeps both views of the same object.
#[derive(Clone)]
struct Ordered {
    server: Arc<dyn Server>,
    order: Arc<dyn OrderServer>,
}

struct Inner {
    ctx: AppContext,
    hang: bool,
    stop_timeout: Duration,
    health_timeout: Duration,
    shutdown_signals: Vec<Signal>,
    registrar: Arc<dyn Registrar>,
    init_error: Mutex<Option<Error>>,
    exit_early: bool,
    watcher: Mutex<Option<RecommendedWatcher>>,
    servers: RwLock<Vec<Arc<dyn Server>>>,
    order_servers: RwLock<Vec<Ordered>>,
    crons: RwLock<Vec<Arc<dyn Cron>>>,
    before_stop: Mutex<Vec<Hook>>,
    after_stop: Mutex<Vec<Hook>>,
    invokers: Mutex<Vec<Invoker>>,
    cycle: Cycle,
    /// Held while launching a component and while a stop claims the app,
    /// so nothing is launched once stopping is set.
    launch_gate: Mutex<()>,
    state: Mutex<State>,
    stopping: AtomicBool,
}

/// The application: its components and their lifecycle.
///
/// Cheap to clone; clones drive the same application.
#[derive(Clone)]
pub struct Ego {
    inner: Arc<Inner>,
}

impl fmt::Debug for Ego {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ego")
            .field("app", &self.inner.ctx.app().name)
            .field("state", &self.state())
            .finish()
    }
}

impl Ego {
    pub fn builder() -> EgoBuilder {
        EgoBuilder::default()
    }

    pub fn context(&self) -> &AppContext {
        &self.inner.ctx
    }

    pub fn state(&self) -> State {
        *self.inner.state.lock()
    }

    fn set_state(&self, state: State) {
        *self.inner.state.lock() = state;
    }

    /// Add a server. Servers start concurrently.
    pub fn serve(&self, server: impl Server + 'static) -> &Self {
        self.inner.servers.write().push(Arc::new(server));
        self
    }

    /// Add a server that is started and health-checked before the next
    /// ordered server.
    pub fn order_serve(&self, server: impl OrderServer + 'static) -> &Self {
        let server = Arc::new(server);
        self.inner.order_servers.write().push(Ordered {
            server: server.clone(),
            order: server,
        });
        self
    }

    pub fn cron(&self, cron: impl Cron + 'static) -> &Self {
        self.inner.crons.write().push(Arc::new(cron));
        self
    }

    /// Register a job. Ignored under `--disable-job`.
    pub fn job(&self, job: impl Job + 'static) -> &Self {
        if self.inner.ctx.flags().disable_job {
            tracing::info!(target: "ego", job = job.name(), "Jobs disabled, ignoring registration");
        } else {
            self.inner.ctx.jobs().register(Arc::new(job));
        }
        self
    }

    /// Add a before-stop hook once the configuration is known.
    pub fn before_stop_clean<F, Fut>(&self, hook: F) -> &Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.inner.before_stop.lock().push(Box::new(move || Box::pin(hook())));
        self
    }

    /// Run the application until it stops.
    ///
    /// Returns the init or invoker error, the first component error, or
    /// `Ok(())`. The after-stop hooks have run by the time this returns.
    pub async fn run(&self) -> Result<()> {
        let result = self.run_inner().await;
        if let Err(e) = &result {
            tracing::error!(target: "ego", error = %e, "Application exited with error");
        }
        self.after_stop().await;
        self.set_state(State::Stopped);
        result
    }

    async fn run_inner(&self) -> Result<()> {
        let init_error = self.inner.init_error.lock().take();
        if let Some(err) = init_error {
            return Err(err);
        }
        if self.inner.exit_early {
            return Ok(());
        }

        let invokers = std::mem::take(&mut *self.inner.invokers.lock());
        for invoker in invokers {
            invoker(self.inner.ctx.clone())
                .await
                .map_err(Error::Component)?;
        }

        self.set_state(State::Running);

        let selected = self.inner.ctx.flags().selected_jobs();
        if !selected.is_empty() {
            if self.inner.order_servers.read().is_empty() {
                return self.run_jobs(selected).await;
            }
            tracing::warn!(target: "ego", jobs = ?selected, "Order servers registered, --job is ignored");
        }

        self.hook_signals()?;
        self.start_servers();
        if let Err(e) = self.start_order_servers().await {
            self.stop(true).await;
            return Err(e);
        }

        // A stop or a failure during startup: the wait below returns once
        // the stop sequence closes the cycle, or with the failure.
        if self.is_stopping() || self.inner.cycle.is_closed() {
            tracing::info!(target: "ego", "Startup interrupted, crons not started");
        } else {
            self.start_crons();
            tracing::info!(
                target: "ego",
                app = %self.inner.ctx.app().name,
                tasks = self.inner.cycle.launched(),
                "Application started"
            );
        }

        match self.inner.cycle.wait(self.inner.hang).await {
            Some(err) => {
                self.stop(true).await;
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Run the named jobs in parallel; the first failure aborts the rest.
    async fn run_jobs(&self, names: Vec<String>) -> Result<()> {
        let mut jobs = Vec::with_capacity(names.len());
        for name in names {
            match self.inner.ctx.jobs().get(&name) {
                Some(job) => jobs.push((name, job)),
                None => return Err(Error::JobNotFound(name)),
            }
        }

        let mut set = JoinSet::new();
        for (name, job) in jobs {
            let run_id = uuid::Uuid::new_v4().to_string();
            let ctx = JobContext::new(name, run_id, self.inner.ctx.shutdown().clone());
            set.spawn(job::execute(job, ctx));
        }

        let mut outcome = Ok(());
        while let Some(joined) = set.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(Error::Panic(e.to_string())));
            if let Err(e) = result {
                set.abort_all();
                outcome = Err(e);
                break;
            }
        }

        self.inner.ctx.shutdown().trigger();
        outcome
    }

    fn hook_signals(&self) -> Result<()> {
        let listener = SignalListener::install(&self.inner.shutdown_signals)?;
        let ego = self.clone();
        signals::hook(listener, move |signal| async move {
            ego.stop(signal.is_graceful()).await;
        });
        Ok(())
    }

    fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::Acquire)
    }

    /// Run `task` on the cycle unless a stop has begun.
    fn spawn_component<F>(&self, task: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let _gate = self.inner.launch_gate.lock();
        if self.is_stopping() {
            return false;
        }
        self.inner.cycle.run(task);
        true
    }

    /// Prepare, register and start `server`. Registration happens after
    /// `prepare` so the registrar sees the bound address.
    fn launch(&self, server: Arc<dyn Server>) -> bool {
        let registrar = self.inner.registrar.clone();
        let launched = self.spawn_component(async move {
            server.prepare().await.map_err(Error::Component)?;
            let info = server.info();
            if let Err(e) = registrar.register_service(&info).await {
                tracing::warn!(target: "ego", server = server.name(), error = %e, "Service registration failed");
            }

            tracing::info!(
                target: "ego",
                server = server.name(),
                package = server.package_name(),
                address = %info.label(),
                "Server starting"
            );
            let result = server.start().await;

            if let Err(e) = registrar.unregister_service(&info).await {
                tracing::warn!(target: "ego", server = server.name(), error = %e, "Service unregistration failed");
            }
            result.map_err(Error::Component)
        });
        if !launched {
            tracing::debug!(target: "ego", "Stop in progress, server not launched");
        }
        launched
    }

    fn start_servers(&self) {
        let servers = self.inner.servers.read().clone();
        for server in servers {
            if !self.launch(server) {
                break;
            }
        }
    }

    async fn start_order_servers(&self) -> Result<()> {
        let ordered = self.inner.order_servers.read().clone();
        for entry in ordered {
            // An earlier server already failed; its error comes out of `wait`.
            if self.inner.cycle.is_closed() || !self.launch(entry.server.clone()) {
                break;
            }
            self.wait_healthy(&entry).await?;
        }
        Ok(())
    }

    async fn wait_healthy(&self, entry: &Ordered) -> Result<()> {
        let timeout = self.inner.health_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            if entry.order.health() {
                tracing::info!(target: "ego", server = entry.server.name(), "Order server healthy");
                return Ok(());
            }
            if self.inner.cycle.is_closed() || self.is_stopping() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Unhealthy {
                    name: entry.server.name().to_string(),
                    timeout,
                });
            }
            time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    fn start_crons(&self) {
        let crons = self.inner.crons.read().clone();
        for cron in crons {
            let launched = self.spawn_component(async move {
                tracing::info!(target: "ego", cron = cron.name(), "Cron starting");
                cron.start().await.map_err(Error::Component)
            });
            if !launched {
                break;
            }
        }
    }

    /// Stop the application. Only the first call runs the stop sequence;
    /// later calls wait for it to finish.
    ///
    /// Must not be awaited from a server, cron or job task: the sequence
    /// waits for those tasks to end.
    pub async fn stop(&self, graceful: bool) {
        let claimed = {
            let _gate = self.inner.launch_gate.lock();
            self.inner
                .stopping
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        };
        if !claimed {
            self.inner.ctx.shutdown().cancelled().await;
            return;
        }

        self.set_state(State::Stopping);
        tracing::info!(target: "ego", graceful, "Application stopping");

        let hooks = std::mem::take(&mut *self.inner.before_stop.lock());
        for hook in hooks {
            if let Err(e) = hook().await {
                tracing::error!(target: "ego", error = %e, "Before-stop hook failed");
            }
        }

        let mut servers = self.inner.servers.read().clone();
        servers.extend(
            self.inner
                .order_servers
                .read()
                .iter()
                .map(|entry| entry.server.clone()),
        );
        let timeout = self.inner.stop_timeout;
        for server in servers {
            self.inner.cycle.run(stop_server(server, graceful, timeout));
        }

        let crons = self.inner.crons.read().clone();
        for cron in crons {
            self.inner.cycle.run(async move {
                cron.stop().await.map_err(Error::Component)
            });
        }

        self.inner.cycle.done().await;
        self.inner.ctx.shutdown().trigger();
        self.inner.cycle.close();
        tracing::info!(target: "ego", "Application stopped");
    }

    async fn after_stop(&self) {
        let hooks = std::mem::take(&mut *self.inner.after_stop.lock());
        for hook in hooks {
            if let Err(e) = hook().await {
                tracing::error!(target: "ego", error = %e, "After-stop hook failed");
            }
        }
        drop(self.inner.watcher.lock().take());
        logging::flush();
    }
}

async fn stop_server(server: Arc<dyn Server>, graceful: bool, timeout: Duration) -> Result<()> {
    let result = if graceful {
        match time::timeout(timeout, server.graceful_stop()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    target: "ego",
                    server = server.name(),
                    timeout = ?timeout,
                    "Graceful stop timed out, forcing"
                );
                server.stop().await
            }
        }
    } else {
        server.stop().await
    };

    if let Err(e) = &result {
        tracing::error!(target: "ego", server = server.name(), error = %e, "Server stop failed");
    }
    result.map_err(Error::Component)
}
