//! Orchestrator lifecycle tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ego::cron::Cron;
use ego::lifecycle::State;
use ego::registry::MemoryRegistrar;
use ego::server::HttpServer;
use ego::{BoxError, Error};
use tokio::sync::Notify;

mod common;
use common::{builder, config_file, eventually, Events, TestServer, QUIET};

fn counter_hook(
    counter: &Arc<AtomicUsize>,
) -> impl FnOnce() -> std::future::Ready<Result<(), BoxError>> + Send + 'static {
    let counter = counter.clone();
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(()))
    }
}

#[tokio::test]
async fn failing_server_ends_run_with_its_error() {
    let config = config_file(QUIET);
    let after_stop = Arc::new(AtomicUsize::new(0));
    let events = Events::default();

    let ego = builder(&config, &[])
        .after_stop_clean(counter_hook(&after_stop))
        .build();
    ego.serve(TestServer::new("boom", &events).failing_after(Duration::from_millis(50)));
    ego.serve(TestServer::new("steady", &events));

    let err = ego.run().await.unwrap_err();

    assert_eq!(err.to_string(), "boom");
    assert_eq!(after_stop.load(Ordering::SeqCst), 1);
    assert_eq!(ego.state(), State::Stopped);
    // The healthy server was stopped gracefully on the way out.
    assert!(events.contains("graceful_stop:steady"));
    assert!(events.contains("exit:steady"));
}

#[tokio::test]
async fn programmatic_stop_returns_ok() {
    let config = config_file(QUIET);
    let events = Events::default();
    let before_stop = Arc::new(AtomicUsize::new(0));

    let ego = builder(&config, &[])
        .before_stop_clean(counter_hook(&before_stop))
        .build();
    ego.serve(TestServer::new("api", &events));

    let running = tokio::spawn({
        let ego = ego.clone();
        async move { ego.run().await }
    });
    assert!(eventually(Duration::from_secs(2), || events.contains("start:api")).await);

    ego.stop(true).await;
    running.await.unwrap().unwrap();

    assert_eq!(before_stop.load(Ordering::SeqCst), 1);
    assert!(ego.context().shutdown().is_triggered());
    assert_eq!(
        events.all(),
        ["prepare:api", "start:api", "graceful_stop:api", "exit:api"]
    );

    // A second stop is a no-op that returns immediately.
    ego.stop(false).await;
    assert_eq!(before_stop.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn forced_stop_skips_draining() {
    let config = config_file(QUIET);
    let events = Events::default();
    let ego = builder(&config, &[]).build();
    ego.serve(TestServer::new("api", &events));

    let running = tokio::spawn({
        let ego = ego.clone();
        async move { ego.run().await }
    });
    assert!(eventually(Duration::from_secs(2), || events.contains("start:api")).await);

    ego.stop(false).await;
    running.await.unwrap().unwrap();
    assert!(events.contains("stop:api"));
    assert!(!events.contains("graceful_stop:api"));
}

#[tokio::test]
async fn graceful_stop_timeout_falls_back_to_stop() {
    let config = config_file(QUIET);
    let events = Events::default();
    let ego = builder(&config, &[])
        .stop_timeout(Duration::from_millis(100))
        .build();
    ego.serve(TestServer::new("stuck", &events).hanging_graceful_stop());

    let running = tokio::spawn({
        let ego = ego.clone();
        async move { ego.run().await }
    });
    assert!(eventually(Duration::from_secs(2), || events.contains("start:stuck")).await);

    tokio::time::timeout(Duration::from_secs(2), ego.stop(true))
        .await
        .unwrap();
    running.await.unwrap().unwrap();
    assert!(events.contains("graceful_stop:stuck"));
    assert!(events.contains("stop:stuck"));
}

#[tokio::test]
async fn init_failure_skips_running() {
    let after_stop = Arc::new(AtomicUsize::new(0));
    let events = Events::default();

    let ego = ego::Ego::builder()
        .disable_banner()
        .args(["ego-test", "--config", "/nonexistent/ego.toml"])
        .after_stop_clean(counter_hook(&after_stop))
        .build();
    ego.serve(TestServer::new("api", &events));

    let err = ego.run().await.unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert_eq!(after_stop.load(Ordering::SeqCst), 1);
    assert!(events.all().is_empty());
}

#[tokio::test]
async fn version_flag_exits_cleanly() {
    let config = config_file(QUIET);
    let events = Events::default();
    let ego = builder(&config, &["--version"]).build();
    ego.serve(TestServer::new("api", &events));

    ego.run().await.unwrap();
    assert!(events.all().is_empty());
}

#[tokio::test]
async fn invoker_failure_behaves_like_init_failure() {
    let config = config_file(QUIET);
    let after_stop = Arc::new(AtomicUsize::new(0));
    let events = Events::default();

    let ego = builder(&config, &[])
        .invoker(|ctx| async move {
            assert!(!ctx.app().name.is_empty());
            Ok(())
        })
        .invoker(|_ctx| async { Err::<(), BoxError>("no database".into()) })
        .after_stop_clean(counter_hook(&after_stop))
        .build();
    ego.serve(TestServer::new("api", &events));

    let err = ego.run().await.unwrap_err();
    assert_eq!(err.to_string(), "no database");
    assert_eq!(after_stop.load(Ordering::SeqCst), 1);
    assert!(events.all().is_empty());
}

#[tokio::test]
async fn nothing_to_run_returns_immediately() {
    let config = config_file(QUIET);
    let ego = builder(&config, &[]).build();

    tokio::time::timeout(Duration::from_secs(1), ego.run())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn hang_waits_for_stop() {
    let config = config_file(QUIET);
    let ego = builder(&config, &[]).hang(true).build();

    let running = tokio::spawn({
        let ego = ego.clone();
        async move { ego.run().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!running.is_finished());

    ego.stop(true).await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn order_servers_start_one_after_another() {
    let config = config_file(QUIET);
    let events = Events::default();
    let ego = builder(&config, &[]).build();
    ego.order_serve(TestServer::new("first", &events));
    ego.order_serve(TestServer::new("second", &events));

    let running = tokio::spawn({
        let ego = ego.clone();
        async move { ego.run().await }
    });
    assert!(eventually(Duration::from_secs(2), || events.contains("start:second")).await);

    let first_started = events.position("start:first").unwrap();
    let second_prepared = events.position("prepare:second").unwrap();
    assert!(events.position("prepare:first").unwrap() < first_started);
    assert!(first_started < second_prepared);

    ego.stop(true).await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn unhealthy_order_server_fails_the_run() {
    let config = config_file(QUIET);
    let events = Events::default();
    let ego = builder(&config, &[])
        .order_server_health_timeout(Duration::from_millis(300))
        .build();
    ego.order_serve(TestServer::new("sick", &events).never_healthy());
    ego.order_serve(TestServer::new("next", &events));

    let err = ego.run().await.unwrap_err();

    assert!(matches!(err, Error::Unhealthy { ref name, .. } if name == "sick"));
    assert!(!events.contains("prepare:next"));
    assert!(events.contains("graceful_stop:sick"));
}

#[tokio::test]
async fn servers_are_registered_with_their_bound_address() {
    let config = config_file(
        "[logger]\nlevel = \"warn\"\n[server.http]\nhost = \"127.0.0.1\"\nport = 0\n",
    );
    let events = Events::default();
    let registrar = Arc::new(MemoryRegistrar::new());
    let ego = builder(&config, &[]).registrar(registrar.clone()).build();
    let http = Arc::new(
        HttpServer::load("server.http", ego.context())
            .unwrap()
            .build(),
    );
    ego.serve(http.clone()).serve(TestServer::new("api", &events));

    let running = tokio::spawn({
        let ego = ego.clone();
        async move { ego.run().await }
    });
    assert!(
        eventually(Duration::from_secs(2), || {
            registrar.contains("api") && registrar.contains("server.http")
        })
        .await
    );

    let bound = http.local_addr().unwrap();
    assert_ne!(bound.port(), 0);
    let registered: Vec<_> = registrar
        .services()
        .into_iter()
        .filter(|info| info.name == "server.http")
        .map(|info| info.address)
        .collect();
    assert_eq!(registered, [bound.to_string()]);

    ego.stop(true).await;
    running.await.unwrap().unwrap();
    assert!(registrar.services().is_empty());
}

/// Cron whose stop only wakes a `start` that is already waiting.
struct NotifyCron {
    started: Arc<AtomicBool>,
    stop: Notify,
}

#[async_trait]
impl Cron for NotifyCron {
    fn name(&self) -> &str {
        "notify"
    }

    async fn start(&self) -> Result<(), BoxError> {
        self.started.store(true, Ordering::SeqCst);
        self.stop.notified().await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.stop.notify_waiters();
        Ok(())
    }
}

#[tokio::test]
async fn stop_during_startup_launches_no_crons() {
    let config = config_file(QUIET);
    let events = Events::default();
    let started = Arc::new(AtomicBool::new(false));
    let ego = builder(&config, &[]).build();
    ego.order_serve(TestServer::new("sick", &events).never_healthy())
        .cron(NotifyCron {
            started: started.clone(),
            stop: Notify::new(),
        });

    let running = tokio::spawn({
        let ego = ego.clone();
        async move { ego.run().await }
    });
    assert!(eventually(Duration::from_secs(2), || events.contains("start:sick")).await);
    tokio::time::sleep(Duration::from_millis(150)).await;

    ego.stop(true).await;
    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(!started.load(Ordering::SeqCst));
    assert_eq!(ego.state(), State::Stopped);
}

#[tokio::test]
async fn before_stop_hooks_run_before_servers_stop() {
    let config = config_file(QUIET);
    let events = Events::default();
    let hook_events = events.clone();
    let ego = builder(&config, &[])
        .before_stop_clean(move || async move {
            hook_events.push("before_stop");
            Ok(())
        })
        .build();
    ego.serve(TestServer::new("api", &events));

    let running = tokio::spawn({
        let ego = ego.clone();
        async move { ego.run().await }
    });
    assert!(eventually(Duration::from_secs(2), || events.contains("start:api")).await);

    ego.stop(true).await;
    running.await.unwrap().unwrap();
    assert!(events.position("before_stop").unwrap() < events.position("graceful_stop:api").unwrap());
}
