use axum::http::{header, HeaderValue, StatusCode};
use axum::*;
use std::sync::Arc;

use crate::{Config, RelayMethod};

pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn respond(self) -> response::Response {
        let mut res = response::Response::new(body::Body::from(self.body));
        *res.status_mut() = StatusCode::from_u16(self.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        with_cors(res)
    }
}

/// The relay is meant to be called from pages served anywhere.
fn with_cors(mut res: response::Response) -> response::Response {
    let h = res.headers_mut();
    h.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    res
}

pub type HttpRespondCb = Box<dyn FnOnce(HttpResponse) + 'static + Send>;

pub enum HttpRequest {
    HealthGet,
    Relay {
        method: RelayMethod,
        action: Option<String>,
        since: Option<String>,
        body: bytes::Bytes,
    },
}

type HSend = async_channel::Sender<(HttpRequest, HttpRespondCb)>;
type HRecv = async_channel::Receiver<(HttpRequest, HttpRespondCb)>;

#[derive(Clone)]
pub struct HttpReceiver(HRecv);

impl HttpReceiver {
    pub fn recv(&self) -> Option<(HttpRequest, HttpRespondCb)> {
        match self.0.recv_blocking() {
            Ok(r) => Some(r),
            Err(_) => None,
        }
    }
}

pub struct ServerConfig {
    pub addrs: Vec<std::net::SocketAddr>,
    pub worker_thread_count: usize,
    pub max_body_bytes: usize,
}

pub struct Server {
    t_join: Option<std::thread::JoinHandle<()>>,
    addrs: Vec<std::net::SocketAddr>,
    receiver: HttpReceiver,
    h_send: HSend,
    shutdown: Option<axum_server::Handle>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.h_send.close();
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.shutdown();
        }
        if let Some(t_join) = self.t_join.take() {
            let _ = t_join.join();
        }
    }
}

impl Server {
    pub fn new(
        config: Arc<Config>,
        server_config: ServerConfig,
    ) -> std::io::Result<Self> {
        let (s_ready, r_ready) = tokio::sync::oneshot::channel();
        let t_join = std::thread::spawn(move || {
            tokio_thread(config, server_config, s_ready)
        });
        match r_ready.blocking_recv() {
            Ok(Ok(Ready {
                h_send,
                addrs,
                receiver,
                shutdown,
            })) => Ok(Self {
                t_join: Some(t_join),
                addrs,
                receiver,
                h_send,
                shutdown: Some(shutdown),
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(std::io::Error::other("failed to bind server")),
        }
    }

    pub fn server_addrs(&self) -> &[std::net::SocketAddr] {
        self.addrs.as_slice()
    }

    pub fn receiver(&self) -> &HttpReceiver {
        &self.receiver
    }
}

struct Ready {
    h_send: HSend,
    addrs: Vec<std::net::SocketAddr>,
    receiver: HttpReceiver,
    shutdown: axum_server::Handle,
}

#[derive(Clone)]
struct AppState {
    h_send: HSend,
}

/// Query parameters understood by the relay endpoint.
#[derive(serde::Deserialize)]
struct RelayQuery {
    action: Option<String>,
    since: Option<String>,
}

type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

fn tokio_thread(
    config: Arc<Config>,
    server_config: ServerConfig,
    ready: tokio::sync::oneshot::Sender<std::io::Result<Ready>>,
) {
    tracing::trace!(?config, "Starting tokio thread");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    runtime.block_on(async move {
        let (h_send, h_recv) =
            async_channel::bounded(server_config.worker_thread_count);

        let app: Router = Router::<AppState>::new()
            .route("/health", routing::get(handle_health_get))
            .route("/", routing::any(handle_relay))
            .route("/chat", routing::any(handle_relay))
            .route("/chat.php", routing::any(handle_relay))
            .layer(extract::DefaultBodyLimit::max(server_config.max_body_bytes))
            .with_state(AppState {
                h_send: h_send.clone(),
            });

        let receiver = HttpReceiver(h_recv);

        let mut addrs = Vec::with_capacity(server_config.addrs.len());
        let mut servers: Vec<BoxFut<'static, std::io::Result<()>>> =
            Vec::with_capacity(server_config.addrs.len());

        let shutdown_handle = axum_server::Handle::new();

        for addr in server_config.addrs {
            tracing::info!("Binding to: {}", addr);

            let listener = match tokio::task::spawn_blocking(move || {
                let listener = std::net::TcpListener::bind(addr)?;
                listener.set_nonblocking(true)?;
                Ok::<_, std::io::Error>(listener)
            })
            .await
            .map_err(std::io::Error::other)
            .and_then(|r| r)
            {
                Ok(listener) => listener,
                Err(err) => {
                    let _ = ready.send(Err(err));
                    return;
                }
            };

            match listener.local_addr() {
                Ok(addr) => {
                    tracing::info!("Bound with local address: {}", addr);
                    addrs.push(addr)
                }
                Err(err) => {
                    let _ = ready.send(Err(err));
                    return;
                }
            }

            let s = axum_server::Server::from_tcp(listener)
                .handle(shutdown_handle.clone())
                .serve(app.clone().into_make_service());
            servers.push(Box::pin(s));
        }

        tracing::info!("Sending ready signal");

        if ready
            .send(Ok(Ready {
                h_send,
                addrs,
                receiver,
                shutdown: shutdown_handle,
            }))
            .is_err()
        {
            return;
        }

        for result in futures::future::join_all(servers).await {
            if let Err(err) = result {
                tracing::warn!(?err, "http listener ended with error");
            }
        }
    });
}

async fn handle_dispatch(
    h_send: &HSend,
    req: HttpRequest,
) -> response::Response {
    let (s, r) = tokio::sync::oneshot::channel();
    let s = Box::new(move |res| {
        let _ = s.send(res);
    });
    tokio::time::timeout(std::time::Duration::from_secs(10), async move {
        let _ = h_send.send((req, s)).await;
        match r.await {
            Ok(r) => r.respond(),
            Err(_) => HttpResponse {
                status: 500,
                body: b"{\"error\":\"request dropped\"}".to_vec(),
            }
            .respond(),
        }
    })
    .await
    .unwrap_or_else(|_| {
        HttpResponse {
            status: 500,
            body: b"{\"error\":\"internal timeout\"}".to_vec(),
        }
        .respond()
    })
}

async fn handle_health_get(
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    handle_dispatch(&state.h_send, HttpRequest::HealthGet).await
}

async fn handle_relay(
    method: http::Method,
    extract::Query(query): extract::Query<RelayQuery>,
    extract::State(state): extract::State<AppState>,
    body: bytes::Bytes,
) -> response::Response {
    // preflight, answered here without touching relay state
    if method == http::Method::OPTIONS {
        let mut res = response::Response::new(body::Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        return with_cors(res);
    }

    let method = if method == http::Method::GET {
        RelayMethod::Get
    } else if method == http::Method::POST {
        RelayMethod::Post
    } else {
        RelayMethod::Other
    };

    handle_dispatch(
        &state.h_send,
        HttpRequest::Relay {
            method,
            action: query.action,
            since: query.since,
            body,
        },
    )
    .await
}
