//! The polling sync engine.

use chatrelay_api::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::*;

/// How often a join or rename renegotiates after losing a concurrent
/// claim before giving up.
const MAX_CLAIM_ATTEMPTS: u32 = 5;

/// Drives a [Session] against a relay.
///
/// Joining negotiates an effective nickname and starts two loops: a sync
/// loop polling the log on a short interval (a long one while not
/// visible), and a heartbeat loop renewing the presence lease regardless
/// of visibility. Network failures only mark the relay offline, the next
/// tick retries.
///
/// Dropping the engine stops the loops and, inside a tokio runtime, fires
/// a best-effort leave. Call [SyncEngine::stop] first to keep the lease
/// until it times out instead.
pub struct SyncEngine {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.abort_tasks();

        let leave = self.inner.with_session(|s| {
            let leave = s.leave();
            s.disconnect();
            leave
        });

        let leave = match leave {
            Some(leave) => leave,
            None => return,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let transport = self.inner.transport.clone();
                runtime.spawn(async move {
                    let nickname = leave.nickname.clone();
                    if let Err(err) = transport.leave(leave).await {
                        tracing::debug!(?err, %nickname, "leave on drop failed");
                    }
                });
            }
            Err(_) => {
                tracing::debug!(
                    nickname = %leave.nickname,
                    "dropped outside a runtime, lease left to time out"
                );
            }
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .field("transport", &self.inner.transport)
            .finish()
    }
}

impl SyncEngine {
    /// Construct an engine over any transport.
    pub fn new(
        config: ClientConfig,
        transport: DynRelayTransport,
        session_id: SessionId,
    ) -> RelayResult<Self> {
        config.validate()?;
        let session = Session::new(session_id, config.channel.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                session: Mutex::new(session),
                syncing: AtomicBool::new(false),
                visible: AtomicBool::new(true),
                wake: tokio::sync::Notify::new(),
            }),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Construct an engine talking http to `config.server_url`.
    pub fn connect(
        config: ClientConfig,
        session_id: SessionId,
    ) -> RelayResult<Self> {
        let transport = HttpTransport::create(&config)?;
        Self::new(config, transport, session_id)
    }

    /// Join as `nickname`, returning the effective nickname, which has a
    /// numeric suffix if another session holds the desired one.
    ///
    /// Any previous join is abandoned without leaving.
    pub async fn join(&self, nickname: &str) -> RelayResult<String> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(RelayError::other("nickname must not be empty"));
        }

        self.abort_tasks();

        let cursor = RecordId::from_timestamp(
            Timestamp::now() - self.inner.config.join_cursor_offset(),
        );
        let generation =
            self.inner.with_session(|s| s.begin_join(nickname, cursor));

        let effective = match self.inner.claim(generation, nickname).await {
            Ok(effective) => effective,
            Err(err) => {
                self.inner.give_up(generation);
                return Err(err);
            }
        };

        if !self
            .inner
            .with_session(|s| s.settle_join(generation, effective.clone()))
        {
            return Err(superseded());
        }

        futures::join!(
            self.inner.fetch_topic(generation),
            self.inner.sync(generation),
        );

        if !self.inner.with_session(|s| s.start_polling(generation)) {
            return Err(superseded());
        }

        self.spawn_loops(generation);

        tracing::info!(%nickname, %effective, "joined");

        Ok(effective)
    }

    /// Stop the loops and give up the presence lease. The leave is sent
    /// once, its failure is returned but changes nothing locally.
    pub async fn leave(&self) -> RelayResult<()> {
        let leave = self.inner.with_session(|s| {
            let leave = s.leave();
            s.disconnect();
            leave
        });

        self.abort_tasks();

        match leave {
            Some(leave) => {
                tracing::info!(nickname = %leave.nickname, "leaving");
                self.inner.transport.leave(leave).await
            }
            None => Ok(()),
        }
    }

    /// Stop the loops without leaving. The lease will time out.
    pub fn stop(&self) {
        self.inner.with_session(|s| s.disconnect());
        self.abort_tasks();
    }

    /// Send a chat message. It shows in the view right away and is
    /// reconciled with the relay's copy when the post returns.
    pub async fn send_message(&self, text: &str) -> RelayResult<Record> {
        let (generation, record, local_id) =
            self.inner.with_session(|s| {
                if s.state() != SyncState::Polling {
                    return Err(RelayError::other("not connected"));
                }
                let record = NewRecord::chat(s.active_nickname(), text);
                let local_id = s.push_local_echo(&record);
                Ok((s.generation(), record, local_id))
            })?;

        match self.inner.transport.post_message(record).await {
            Ok(confirmed) => {
                self.inner.with_session(|s| {
                    s.reconcile(generation, local_id, confirmed.clone());
                    s.set_online(generation, true);
                });
                self.inner.sync(generation).await;
                Ok(confirmed)
            }
            Err(err) => {
                tracing::debug!(?err, "message post failed");
                self.inner
                    .with_session(|s| s.set_online(generation, false));
                Err(err)
            }
        }
    }

    /// Show a client-side note. Notes are never sent.
    pub fn note(&self, text: impl Into<String>) {
        self.inner.with_session(|s| s.push_note(text));
    }

    /// Set the channel topic as the current nickname.
    pub async fn update_topic(&self, text: &str) -> RelayResult<Topic> {
        let (generation, user) = self.inner.with_session(|s| {
            (s.generation(), s.active_nickname().to_string())
        });
        let req = SetTopic {
            topic: text.to_string(),
            user: (!user.is_empty()).then_some(user),
        };

        match self.inner.transport.set_topic(req).await {
            Ok(topic) => {
                self.inner.with_session(|s| {
                    s.set_topic(generation, topic.clone(), false);
                    s.set_online(generation, true);
                });
                Ok(topic)
            }
            Err(err) => {
                self.inner
                    .with_session(|s| s.set_online(generation, false));
                Err(err)
            }
        }
    }

    /// Switch nickname: leave under the old one, negotiate the new one,
    /// and heartbeat under the result, which is returned.
    pub async fn change_nickname(&self, nickname: &str) -> RelayResult<String> {
        let clean = nickname.trim();
        if clean.chars().count() < 3 {
            self.note("*** Nickname must be at least 3 characters.");
            return Err(RelayError::other(
                "nickname must be at least 3 characters",
            ));
        }

        if let Some(leave) = self.inner.with_session(|s| s.leave()) {
            if let Err(err) = self.inner.transport.leave(leave).await {
                tracing::debug!(?err, "leave before rename failed");
            }
        }

        let generation = match self.inner.with_session(|s| s.begin_rename(clean))
        {
            Some(generation) => generation,
            None => {
                self.note(format!("*** Your nickname is now {clean}"));
                return Ok(clean.to_string());
            }
        };

        let effective = match self.inner.claim(generation, clean).await {
            Ok(effective) => effective,
            Err(err) => {
                self.inner.give_up(generation);
                return Err(err);
            }
        };

        if !self
            .inner
            .with_session(|s| s.settle_rename(generation, effective.clone()))
        {
            return Err(superseded());
        }

        tracing::info!(%effective, "nickname changed");

        Ok(effective)
    }

    /// Refresh the user list now, returning it without our own nickname.
    pub async fn refresh_users(&self) -> RelayResult<Vec<String>> {
        let generation = self.inner.with_session(|s| s.generation());
        self.inner.refresh_users(generation).await
    }

    /// Sync the log now, unless a sync is already in flight.
    pub async fn sync_now(&self) {
        let generation = self.inner.with_session(|s| s.generation());
        self.inner.sync(generation).await;
    }

    /// Tell the engine whether the user can see the chat. While hidden
    /// the log is polled on the background interval only. Becoming
    /// visible heartbeats and syncs right away.
    pub fn set_visible(&self, visible: bool) {
        let was = self.inner.visible.swap(visible, Ordering::SeqCst);
        if visible && !was {
            self.inner.wake.notify_one();
        }
    }

    /// Empty the local message view.
    pub fn clear_history(&self) {
        self.inner.with_session(|s| s.clear_history());
    }

    /// A copy of the current session state.
    pub fn snapshot(&self) -> Session {
        self.inner.with_session(|s| s.clone())
    }

    fn spawn_loops(&self, generation: u64) {
        let sync_task =
            tokio::task::spawn(sync_loop(self.inner.clone(), generation));
        let heartbeat_task =
            tokio::task::spawn(heartbeat_loop(self.inner.clone(), generation));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([sync_task, heartbeat_task]);
    }

    fn abort_tasks(&self) {
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

fn superseded() -> RelayError {
    RelayError::other("session was left or rejoined meanwhile")
}

struct Inner {
    config: ClientConfig,
    transport: DynRelayTransport,
    session: Mutex<Session>,
    syncing: AtomicBool,
    visible: AtomicBool,
    wake: tokio::sync::Notify,
}

/// Clears the in-flight flag when a sync ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Inner {
    fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut guard =
            self.session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.with_session(|s| s.is_current(generation))
    }

    /// Pull new records, then the user list.
    async fn sync(&self, generation: u64) {
        if self.syncing.swap(true, Ordering::AcqRel) {
            tracing::trace!("sync already in flight, skipping");
            return;
        }
        let _in_flight = InFlight(&self.syncing);

        let cursor = match self
            .with_session(|s| s.is_current(generation).then(|| s.cursor()))
        {
            Some(cursor) => cursor,
            None => return,
        };

        match self.transport.messages(Some(cursor)).await {
            Ok(records) => {
                let merged = self.with_session(|s| {
                    s.set_online(generation, true);
                    s.merge_polled(generation, records)
                });
                if let Some(merged) = merged {
                    if merged.added > 0 {
                        tracing::debug!(added = merged.added, "synced");
                    }
                    if merged.topic_changed {
                        self.fetch_topic(generation).await;
                    }
                }
            }
            Err(err) => {
                tracing::debug!(?err, "failure syncing with relay");
                self.with_session(|s| s.set_online(generation, false));
                return;
            }
        }

        if let Err(err) = self.refresh_users(generation).await {
            tracing::debug!(?err, "failure listing relay users");
        }
    }

    /// Fetch the topic and show it as a local note.
    async fn fetch_topic(&self, generation: u64) {
        match self.transport.topic().await {
            Ok(topic) => {
                self.with_session(|s| {
                    s.set_topic(generation, topic, true);
                    s.set_online(generation, true);
                });
            }
            Err(err) => {
                tracing::debug!(?err, "failure fetching topic");
                self.with_session(|s| s.set_online(generation, false));
            }
        }
    }

    async fn refresh_users(
        &self,
        generation: u64,
    ) -> RelayResult<Vec<String>> {
        match self.transport.users().await {
            Ok(users) => Ok(self.with_session(|s| {
                s.set_users(generation, users);
                s.set_online(generation, true);
                s.users().to_vec()
            })),
            Err(err) => {
                self.with_session(|s| s.set_online(generation, false));
                Err(err)
            }
        }
    }

    /// The full lease list for negotiation.
    async fn presence(
        &self,
        generation: u64,
    ) -> RelayResult<Vec<PresenceEntry>> {
        match self.transport.presence().await {
            Ok(entries) => {
                self.with_session(|s| s.set_online(generation, true));
                Ok(entries)
            }
            Err(err) => {
                tracing::debug!(?err, "could not list presence for negotiation");
                self.with_session(|s| s.set_online(generation, false));
                Err(err)
            }
        }
    }

    /// Negotiate a nickname from `desired`, claim it with a heartbeat and
    /// check the claim held. Losing to a concurrent claim by another
    /// session renegotiates against the fresh lease list.
    ///
    /// If the relay cannot be reached, the desired name is assumed free
    /// and kept unverified. The heartbeat loop claims it later.
    async fn claim(
        &self,
        generation: u64,
        desired: &str,
    ) -> RelayResult<String> {
        let session_id = self.with_session(|s| s.session_id().clone());
        let mut entries = self.presence(generation).await.unwrap_or_default();

        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            let candidate = negotiate(desired, &session_id, &entries);

            let beat = self
                .with_session(|s| {
                    s.claim_heartbeat(
                        generation,
                        &candidate,
                        self.config.lat,
                        self.config.lon,
                    )
                })
                .ok_or_else(superseded)?;

            if let Err(err) = self.transport.heartbeat(beat).await {
                tracing::debug!(?err, %candidate, "could not claim nickname");
                self.with_session(|s| s.set_online(generation, false));
                return Ok(candidate);
            }

            entries = match self.presence(generation).await {
                Ok(entries) => entries,
                Err(_) => return Ok(candidate),
            };

            if !is_claimed_by_other(&candidate, &session_id, &entries) {
                return Ok(candidate);
            }

            tracing::debug!(
                attempt,
                %candidate,
                "nickname claimed by another session first"
            );
        }

        Err(RelayError::other(format!(
            "no nickname based on '{desired}' could be claimed"
        )))
    }

    /// Abandon a join or rename that failed, unless something newer
    /// already replaced it.
    fn give_up(&self, generation: u64) {
        self.with_session(|s| {
            if s.is_current(generation) {
                s.disconnect();
            }
        });
    }

    /// Renew the lease, if polling under a negotiated nickname.
    async fn heartbeat(&self) {
        let (generation, beat) = self.with_session(|s| {
            (
                s.generation(),
                s.heartbeat(self.config.lat, self.config.lon),
            )
        });

        let beat = match beat {
            Some(beat) => beat,
            None => return,
        };

        match self.transport.heartbeat(beat).await {
            Ok(()) => {
                self.with_session(|s| s.set_online(generation, true));
            }
            Err(err) => {
                tracing::debug!(?err, "heartbeat failed");
                self.with_session(|s| s.set_online(generation, false));
            }
        }
    }
}

async fn sync_loop(inner: Arc<Inner>, generation: u64) {
    let mut last_sync = tokio::time::Instant::now();

    loop {
        let woken = tokio::select! {
            _ = tokio::time::sleep(inner.config.sync_interval()) => false,
            _ = inner.wake.notified() => true,
        };

        if !inner.is_current(generation) {
            break;
        }

        if woken {
            inner.heartbeat().await;
        } else if !inner.visible.load(Ordering::SeqCst)
            && last_sync.elapsed() < inner.config.background_sync_interval()
        {
            continue;
        }

        inner.sync(generation).await;
        last_sync = tokio::time::Instant::now();
    }
}

async fn heartbeat_loop(inner: Arc<Inner>, generation: u64) {
    loop {
        tokio::time::sleep(inner.config.heartbeat_interval()).await;

        if !inner.is_current(generation) {
            break;
        }

        inner.heartbeat().await;
    }
}
