//! relay http server types.

use std::sync::Arc;

use chatrelay_api::*;

use crate::*;

/// Print out a message if this thread dies.
struct ThreadGuard(&'static str);

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        tracing::debug!("{}", self.0);
    }
}

/// An actual chatrelay_srv server instance.
///
/// As with the storage units it fronts, request handling is blocking:
/// the http listener runs on its own tokio thread and hands every request
/// to a pool of os thread workers.
pub struct RelaySrv {
    cont: Arc<std::sync::atomic::AtomicBool>,
    workers: Vec<std::thread::JoinHandle<std::io::Result<()>>>,
    addrs: Vec<std::net::SocketAddr>,
    relay: Arc<Relay>,
    server: Option<Server>,
}

impl Drop for RelaySrv {
    fn drop(&mut self) {
        let _g = ThreadGuard("Server Shutdown Complete!");

        tracing::debug!("begin server shutdown...");
        let _ = self.shutdown();
    }
}

impl RelaySrv {
    /// Construct a new RelaySrv instance.
    pub fn new(config: Config) -> std::io::Result<Self> {
        let relay = Relay::new(&config);
        Self::with_relay(config, relay)
    }

    /// Construct a new RelaySrv instance serving an existing relay.
    pub fn with_relay(config: Config, relay: Relay) -> std::io::Result<Self> {
        if let Some(dir) = &config.data_dir {
            std::fs::create_dir_all(dir)?;
        }

        let config = Arc::new(config);

        // atomic flag for telling worker threads to shutdown
        let cont = Arc::new(std::sync::atomic::AtomicBool::new(true));

        let relay = Arc::new(relay);

        let sconf = ServerConfig {
            addrs: config.listen_address_list.clone(),
            worker_thread_count: config.worker_thread_count,
            max_body_bytes: config.max_body_bytes,
        };

        // start the actual http server
        let server = Server::new(config.clone(), sconf)?;

        // get the address that was assigned
        let addrs = server.server_addrs().to_vec();
        tracing::info!(?addrs, "Listening");

        // spawn our worker threads
        let mut workers = Vec::with_capacity(config.worker_thread_count + 1);
        for _ in 0..config.worker_thread_count {
            let cont = cont.clone();
            let relay = relay.clone();
            let recv = server.receiver().clone();
            workers.push(std::thread::spawn(move || worker(cont, relay, recv)));
        }

        // also sweep when nobody is talking to us
        let sweep_cont = cont.clone();
        let sweep_relay = relay.clone();
        workers.push(std::thread::spawn(move || {
            idle_sweep_worker(config, sweep_cont, sweep_relay)
        }));

        Ok(Self {
            cont,
            workers,
            addrs,
            relay,
            server: Some(server),
        })
    }

    /// Shutdown the server, returning an error result if any
    /// of the worker threads had panicked.
    pub fn shutdown(&mut self) -> std::io::Result<()> {
        let mut is_err = false;
        self.cont.store(false, std::sync::atomic::Ordering::SeqCst);
        drop(self.server.take());
        while let Some(worker) = self.workers.pop() {
            tracing::debug!(
                "waiting on {} threads to close...",
                self.workers.len() + 1
            );
            if worker.join().is_err() {
                is_err = true;
            }
        }
        tracing::debug!("all threads closed.");
        if is_err {
            Err(std::io::Error::other("Failure shutting down worker thread"))
        } else {
            Ok(())
        }
    }

    /// Get the bound listening addresses of this server.
    pub fn listen_addrs(&self) -> &[std::net::SocketAddr] {
        self.addrs.as_slice()
    }

    /// The relay state this server fronts.
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Print the address server started on
    pub fn print_addrs(&self) {
        println!("#chatrelay_srv#running#");
        for addr in self.addrs.iter() {
            // print these incase someone wants to parse for them
            println!("#chatrelay_srv#listening#{addr:?}#");
        }
    }
}

fn idle_sweep_worker(
    config: Arc<Config>,
    cont: Arc<std::sync::atomic::AtomicBool>,
    relay: Arc<Relay>,
) -> std::io::Result<()> {
    let _g = ThreadGuard("idle_sweep_worker thread has ended");

    let mut last_check = std::time::Instant::now();

    while cont.load(std::sync::atomic::Ordering::SeqCst) {
        std::thread::sleep(config.request_listen_duration);

        if last_check.elapsed() >= config.idle_sweep_interval {
            last_check = std::time::Instant::now();

            if let Some(report) = relay.maintain(Timestamp::now()) {
                if !report.evicted.is_empty() || report.pruned > 0 {
                    tracing::debug!(?report, "idle sweep");
                }
            }
        }
    }

    Ok(())
}

fn worker(
    cont: Arc<std::sync::atomic::AtomicBool>,
    relay: Arc<Relay>,
    recv: HttpReceiver,
) -> std::io::Result<()> {
    let _g = ThreadGuard("worker thread has ended");

    while cont.load(std::sync::atomic::Ordering::SeqCst) {
        let (req, res) = match recv.recv() {
            None => break,
            Some(r) => r,
        };

        let handler = Handler {
            relay: &relay,
            res,
        };

        handler.handle(req)?;
    }

    Ok(())
}

struct Handler<'lt> {
    relay: &'lt Relay,
    res: HttpRespondCb,
}

impl Handler<'_> {
    /// Wrap the handle call so we can respond to the client with errors.
    pub fn handle(self, req: HttpRequest) -> std::io::Result<()> {
        match self.handle_inner(req) {
            Ok((status, body)) => self.respond(status, body),
            Err(err) => {
                tracing::warn!(?err, "relay request failed");
                self.respond(
                    500,
                    serde_json::to_string(&serde_json::json!({
                        "error": format!("{err:?}"),
                    }))?
                    .into_bytes(),
                )
            }
        }

        Ok(())
    }

    /// Dispatch to the correct handlers.
    fn handle_inner(&self, req: HttpRequest) -> std::io::Result<(u16, Vec<u8>)> {
        match req {
            HttpRequest::HealthGet => Ok((200, b"{}".to_vec())),
            HttpRequest::Relay {
                method,
                action,
                since,
                body,
            } => self.handle_relay(RelayAction::parse(
                method,
                action.as_deref(),
                since.as_deref(),
                &body,
            )),
        }
    }

    fn handle_relay(
        &self,
        action: RelayAction,
    ) -> std::io::Result<(u16, Vec<u8>)> {
        let now = Timestamp::now();

        if action.runs_maintenance() {
            self.relay.maintain(now);
        }

        match action {
            RelayAction::MessagesGet { since } => {
                ok(200, &self.relay.messages(since))
            }
            RelayAction::MessagesPost(record) => {
                ok(201, &self.relay.post_message(record, now))
            }
            RelayAction::TopicGet => ok(200, &self.relay.topic()),
            RelayAction::TopicPost(req) => {
                ok(200, &self.relay.set_topic(req, now))
            }
            RelayAction::PresenceGet => ok(200, &self.relay.presence()),
            RelayAction::PresencePost(beat) => {
                self.relay.heartbeat(beat, now);
                ok(200, &serde_json::json!({ "status": "ok" }))
            }
            RelayAction::LeavePost(Leave { nickname }) => {
                self.relay.leave(&nickname, now);
                ok(200, &serde_json::json!({ "status": "ok" }))
            }
            RelayAction::Users => ok(200, &self.relay.users()),
            RelayAction::NotFound(action) => ok(
                404,
                &serde_json::json!({
                    "error": format!("Action {action} Not Found"),
                }),
            ),
        }
    }

    /// Process the response.
    fn respond(self, status: u16, body: Vec<u8>) {
        let Self { res, .. } = self;
        res(HttpResponse { status, body });
    }
}

fn ok<T: serde::Serialize>(
    status: u16,
    body: &T,
) -> std::io::Result<(u16, Vec<u8>)> {
    Ok((status, serde_json::to_vec(body)?))
}
