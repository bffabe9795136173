use chatrelay_client::*;
use chatrelay_test_utils::enable_tracing;
use chatrelay_test_utils::relay::TestRelay;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn config(url: &str) -> ClientConfig {
    ClientConfig {
        sync_interval_ms: 50,
        heartbeat_interval_ms: 200,
        ..ClientConfig::new(url)
    }
}

fn session(id: &str) -> SessionId {
    SessionId::from(id.to_string())
}

fn count(s: &Session, text: &str) -> usize {
    s.messages().iter().filter(|m| m.text == text).count()
}

async fn wait_for(e: &SyncEngine, f: impl Fn(&Session) -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while !f(&e.snapshot()) {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}

#[test]
fn two_clients_same_nickname() {
    enable_tracing();

    // the relay runs its own runtime, start it outside ours
    let relay = TestRelay::start();

    runtime().block_on(async {
        let a = SyncEngine::connect(config(&relay.url()), session("sess-a"))
            .unwrap();
        let b = SyncEngine::connect(config(&relay.url()), session("sess-b"))
            .unwrap();

        assert_eq!("neo", a.join("neo").await.unwrap());
        assert_eq!("neo2", b.join("neo").await.unwrap());

        let hello = a.send_message("hello").await.unwrap();
        assert_eq!(Some("neo"), hello.user.as_deref());

        wait_for(&b, |s| count(s, "hello") > 0).await;

        // give a few more polls the chance to duplicate it
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert_eq!(1, count(&b.snapshot(), "hello"));
        assert_eq!(1, count(&a.snapshot(), "hello"));

        wait_for(&a, |s| s.users() == ["neo2".to_string()]).await;
        wait_for(&b, |s| s.users() == ["neo".to_string()]).await;

        // a saw b arrive through the log
        wait_for(&a, |s| count(s, "*** neo2 has joined the channel") == 1)
            .await;

        b.leave().await.unwrap();
        wait_for(&a, |s| count(s, "*** neo2 has left (disconnected)") == 1)
            .await;
        wait_for(&a, |s| s.users().is_empty()).await;
    });
}

#[test]
fn refresh_reclaims_nickname() {
    enable_tracing();

    let relay = TestRelay::start();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session");

    runtime().block_on(async {
        let first = SessionId::load_or_create(&path).unwrap();
        let a = SyncEngine::connect(config(&relay.url()), first).unwrap();
        assert_eq!("neo", a.join("neo").await.unwrap());

        // the page goes away without leaving
        a.stop();
        drop(a);

        let again = SessionId::load_or_create(&path).unwrap();
        let a = SyncEngine::connect(config(&relay.url()), again).unwrap();
        assert_eq!("neo", a.join("neo").await.unwrap());

        let s = a.snapshot();
        assert!(!s
            .messages()
            .iter()
            .any(|m| m.text.starts_with("*** Nickname 'neo' is taken")));

        assert_eq!(vec!["neo".to_string()], relay.srv().relay().users());
    });
}

#[test]
fn concurrent_joins_get_distinct_nicknames() {
    enable_tracing();

    let relay = TestRelay::start();

    runtime().block_on(async {
        for round in 0..10 {
            let a = std::sync::Arc::new(
                SyncEngine::connect(
                    config(&relay.url()),
                    session(&format!("sess-a{round}")),
                )
                .unwrap(),
            );
            let b = std::sync::Arc::new(
                SyncEngine::connect(
                    config(&relay.url()),
                    session(&format!("sess-b{round}")),
                )
                .unwrap(),
            );

            let nick = format!("neo{round}x");
            let join_a = {
                let (a, nick) = (a.clone(), nick.clone());
                tokio::spawn(async move { a.join(&nick).await })
            };
            let join_b = {
                let (b, nick) = (b.clone(), nick.clone());
                tokio::spawn(async move { b.join(&nick).await })
            };

            let got_a = join_a.await.unwrap().unwrap();
            let got_b = join_b.await.unwrap().unwrap();
            assert_ne!(got_a, got_b, "round {round}");

            let mut got = vec![got_a.clone(), got_b.clone()];
            got.sort();
            assert_eq!(vec![nick.clone(), format!("{nick}2")], got);

            // each lease belongs to the session that was told it won
            let held = relay.srv().relay().presence();
            for (name, sess) in [
                (&got_a, format!("sess-a{round}")),
                (&got_b, format!("sess-b{round}")),
            ] {
                let entry = held.iter().find(|e| e.nickname == *name).unwrap();
                assert_eq!(Some(sess.as_str()), entry.session_id.as_deref());
            }

            // leaving one does not evict the other
            b.leave().await.unwrap();
            let users = relay.srv().relay().users();
            assert!(users.contains(&got_a), "round {round}: {users:?}");
            assert!(!users.contains(&got_b), "round {round}: {users:?}");

            a.leave().await.unwrap();
        }
    });
}

#[test]
fn topic_round_trip() {
    enable_tracing();

    let relay = TestRelay::start();

    runtime().block_on(async {
        let a = SyncEngine::connect(config(&relay.url()), session("sess-a"))
            .unwrap();
        let b = SyncEngine::connect(config(&relay.url()), session("sess-b"))
            .unwrap();
        a.join("morpheus").await.unwrap();
        b.join("neo").await.unwrap();

        let t = a.update_topic("free your mind").await.unwrap();
        assert_eq!("morpheus", t.author);

        wait_for(&b, |s| {
            s.topic().map(|t| t.text.as_str()) == Some("free your mind")
        })
        .await;
        wait_for(&b, |s| {
            count(s, "*** morpheus changed the topic to: free your mind") == 1
        })
        .await;
    });
}

#[test]
fn unreachable_relay_is_not_fatal() {
    enable_tracing();

    runtime().block_on(async {
        // nothing listens on the discard port of localhost
        let e = SyncEngine::connect(
            ClientConfig {
                request_timeout_ms: 1000,
                ..config("http://127.0.0.1:9/chat.php")
            },
            session("sess-a"),
        )
        .unwrap();

        assert_eq!("neo", e.join("neo").await.unwrap());

        let s = e.snapshot();
        assert_eq!(SyncState::Polling, s.state());
        assert!(!s.is_server_online());

        assert!(e.send_message("anyone?").await.is_err());
        assert_eq!(1, count(&e.snapshot(), "anyone?"));
    });
}

#[test]
fn connect_rejects_bad_url() {
    assert!(
        SyncEngine::connect(ClientConfig::default(), session("sess-a"))
            .is_err()
    );
}
