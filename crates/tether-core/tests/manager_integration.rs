#[cfg(unix)]
mod manager_integration {
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tether_core::testing::FakeAdapter;
    use tether_core::{
        AdapterRegistry, LogOptions, Manager, ManagerError, SendOptions, SessionFilter,
        StopOptions, TetherConfig,
    };
    use tether_proto::{ErrorCode, MessageDirection, SessionStatus, SpawnConfig};

    const TRAP_TERM: &str = "trap '' TERM; printf 'fake> '; while :; do sleep 1; done";
    const CRASH_AFTER_READY: &str = "printf 'fake> '; sleep 0.3; exit 1";

    fn manager(max_sessions: usize) -> Manager {
        let mut config = TetherConfig::default();
        config.manager.max_sessions = max_sessions;
        config.manager.debounce_ms = 50;
        config.manager.stop_timeout_ms = 500;
        config.manager.max_restarts = 1;
        let registry = AdapterRegistry::new()
            .with(Arc::new(FakeAdapter::new("fake")))
            .with(Arc::new(FakeAdapter::new("stubborn").with_script(TRAP_TERM)))
            .with(Arc::new(FakeAdapter::new("crashy").with_script(CRASH_AFTER_READY)));
        Manager::new(config, registry).expect("manager")
    }

    fn ready(name: &str, agent_type: &str) -> SpawnConfig {
        SpawnConfig::new(name, agent_type).wait_for_ready(5_000)
    }

    #[tokio::test]
    async fn spawn_waits_for_ready_prompt() {
        let manager = manager(4);
        let started = Instant::now();
        let handle = manager.spawn(ready("one", "fake")).await.expect("spawn");

        assert_eq!(handle.status, SessionStatus::Ready);
        assert!(handle.pid.is_some());
        assert!(started.elapsed() < Duration::from_secs(5));

        manager.shutdown(true).await;
    }

    #[tokio::test]
    async fn capacity_ceiling_frees_a_slot_on_stop() {
        let manager = manager(2);
        let first = manager.spawn(ready("a", "fake")).await.expect("first");
        manager.spawn(ready("b", "fake")).await.expect("second");

        let err = manager.spawn(ready("c", "fake")).await.unwrap_err();
        assert!(matches!(err, ManagerError::CapacityExceeded { active: 2, max: 2 }));
        assert_eq!(err.code(), ErrorCode::CapacityExceeded);

        let stopped = manager.stop(&first.id, StopOptions::forced()).await.expect("stop");
        assert_eq!(stopped.status, SessionStatus::Stopped);

        manager.spawn(ready("c", "fake")).await.expect("slot freed");
        manager.shutdown(true).await;
    }

    #[tokio::test]
    async fn unknown_adapter_and_unknown_session() {
        let manager = manager(2);
        let err = manager.spawn(SpawnConfig::new("x", "nope")).await.unwrap_err();
        assert!(matches!(err, ManagerError::UnknownAdapter(_)));

        let err = manager
            .send("missing", "hi", SendOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn send_waits_for_outbound_message() {
        let manager = manager(2);
        let handle = manager.spawn(ready("echo", "fake")).await.expect("spawn");

        let response = manager
            .send(
                &handle.id,
                "hello",
                SendOptions::expect_response(Duration::from_secs(5)),
            )
            .await
            .expect("send")
            .expect("response");
        assert_eq!(response.direction, MessageDirection::Outbound);
        assert!(response.content.contains("got: hello"));

        let logs = manager
            .logs(&handle.id, LogOptions { tail: Some(5) })
            .await
            .expect("logs");
        assert!(logs.iter().any(|l| l.contains("got: hello")));

        let metrics = manager.metrics(&handle.id).await.expect("metrics");
        assert_eq!(metrics.messages_sent, 1);
        assert!(metrics.messages_received >= 1);

        manager.shutdown(true).await;
    }

    #[tokio::test]
    async fn graceful_stop_escalates_when_term_is_ignored() {
        let manager = manager(2);
        let handle = manager.spawn(ready("stubborn", "stubborn")).await.expect("spawn");

        let started = Instant::now();
        let stopped = manager
            .stop(&handle.id, StopOptions::graceful(Duration::from_millis(300)))
            .await
            .expect("stop");
        assert_eq!(stopped.status, SessionStatus::Stopped);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn force_stop_ends_stopped() {
        let manager = manager(2);
        let handle = manager.spawn(ready("stubborn", "stubborn")).await.expect("spawn");

        let stopped = manager
            .stop(&handle.id, StopOptions::forced())
            .await
            .expect("stop");
        assert_eq!(stopped.status, SessionStatus::Stopped);

        // Stopping twice is a no-op.
        let again = manager.stop(&handle.id, StopOptions::forced()).await.expect("stop");
        assert_eq!(again.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn list_filters_by_type_and_role() {
        let manager = manager(4);
        manager
            .spawn(ready("r", "fake").with_role("reviewer"))
            .await
            .expect("spawn");
        manager.spawn(ready("s", "stubborn")).await.expect("spawn");

        let all = manager.list(&SessionFilter::default()).await;
        assert_eq!(all.len(), 2);

        let reviewers = manager
            .list(&SessionFilter {
                role: Some("reviewer".into()),
                ..SessionFilter::default()
            })
            .await;
        assert_eq!(reviewers.len(), 1);
        assert_eq!(reviewers[0].name, "r");

        let report = manager.shutdown(true).await;
        assert_eq!(report.sessions_stopped, 2);
        assert!(
            manager
                .list(&SessionFilter::default())
                .await
                .iter()
                .all(|h| h.status.is_terminal())
        );
    }

    #[tokio::test]
    async fn crashed_session_is_restarted_once() {
        let manager = manager(2);
        let mut config = ready("crashy", "crashy");
        config.auto_restart = true;
        let handle = manager.spawn(config).await.expect("spawn");

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let current = manager.get(&handle.id).await.expect("get");
            if current.restarts == 1 {
                break;
            }
            assert!(Instant::now() < deadline, "session was not restarted");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // The restart limit is one; the second crash leaves it stopped.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let current = manager.get(&handle.id).await.expect("get");
        assert_eq!(current.restarts, 1);
        assert!(current.status.is_terminal());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_sessions() {
        let manager = manager(2);
        manager.shutdown(false).await;
        let err = manager.spawn(ready("late", "fake")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[tokio::test]
    async fn restart_after_shutdown_is_rejected() {
        let manager = manager(2);
        let handle = manager.spawn(ready("one", "fake")).await.expect("spawn");
        let report = manager.shutdown(true).await;
        assert_eq!(report.sessions_stopped, 1);

        let err = manager.restart(&handle.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        let current = manager.get(&handle.id).await.expect("get");
        assert_eq!(current.status, SessionStatus::Stopped);
        assert_eq!(current.restarts, 0);
    }

    #[tokio::test]
    async fn spawn_racing_shutdown_leaves_nothing_running() {
        let manager = manager(4);
        let (spawned, _report) = tokio::join!(
            manager.spawn(SpawnConfig::new("late", "fake")),
            manager.shutdown(true)
        );

        if let Ok(handle) = spawned {
            let current = manager.get(&handle.id).await.expect("get");
            assert!(current.status.is_terminal(), "{}", current.status);
        }
        for handle in manager.list(&SessionFilter::default()).await {
            assert!(handle.status.is_terminal(), "{} is {}", handle.id, handle.status);
        }
    }

    #[tokio::test]
    async fn follow_logs_outlives_the_lookup() {
        let manager = manager(2);
        let handle = manager.spawn(ready("one", "fake")).await.expect("spawn");
        let mut lines = manager.follow_logs(&handle.id).await.expect("follow");

        manager
            .send(&handle.id, "hello", SendOptions::default())
            .await
            .expect("send");
        let found = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(line) = lines.next().await {
                if line.contains("got: hello") {
                    return true;
                }
            }
            false
        })
        .await
        .expect("log line in time");
        assert!(found);

        manager.shutdown(true).await;
    }
}
