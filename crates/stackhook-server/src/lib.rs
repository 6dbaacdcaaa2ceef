//! HTTP transport for stackhook lifecycle handlers.
//!
//! Routes:
//! - `POST /events` runs one inbound event through the [`Dispatcher`] on its
//!   own thread and answers once the acknowledgment has been delivered:
//!   200 with the delivered response, 400 when the event cannot be
//!   acknowledged at all, 502 when the callback URL could not be reached.
//! - `GET /health` answers `{"status":"ok"}`.
//!
//! On shutdown the server stops accepting and waits for events in flight.
//!
//! [`TestServer`] and [`CallbackSink`] start in-process servers on random
//! ports for integration testing.

use stackhook_core::{CoreError, Dispatcher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C stops accepting events; a second one exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing in-flight events...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

fn json_header() -> Header {
    Header::from_bytes("Content-Type", "application/json").expect("valid header")
}

fn respond_err(req: tiny_http::Request, code: u16, msg: &str) {
    let _ = req.respond(Response::from_string(msg).with_status_code(StatusCode(code)));
}

fn respond_json(req: tiny_http::Request, code: u16, json: impl Into<Vec<u8>>) {
    let response = Response::from_data(json.into())
        .with_header(json_header())
        .with_status_code(StatusCode(code));
    let _ = req.respond(response);
}

fn read_body(req: &mut tiny_http::Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    if req.as_reader().read_to_end(&mut body).is_ok() {
        Some(body)
    } else {
        None
    }
}

fn handle_event(dispatcher: &Dispatcher, mut req: tiny_http::Request) {
    let Some(body) = read_body(&mut req) else {
        respond_err(req, 500, "read error");
        return;
    };
    match dispatcher.handle_event(&body) {
        Ok(response) => match response.to_body() {
            Ok(json) => respond_json(req, 200, json),
            Err(e) => respond_err(req, 500, &e.to_string()),
        },
        Err(e @ CoreError::Callback(_)) => {
            error!("POST /events: {e}");
            respond_err(req, 502, &e.to_string());
        }
        Err(e) => {
            info!("POST /events rejected: {e}");
            respond_err(req, 400, &e.to_string());
        }
    }
}

/// Handle a single HTTP request on the calling thread.
pub fn handle_request(dispatcher: &Dispatcher, req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    match (url.as_str(), &method) {
        ("/events", Method::Post) => handle_event(dispatcher, req),
        ("/health", Method::Get) => respond_json(req, 200, r#"{"status":"ok"}"#),
        ("/events" | "/health", _) => respond_err(req, 405, "method not allowed"),
        _ => respond_err(req, 404, "not found"),
    }
}

fn spawn_handler(dispatcher: &Arc<Dispatcher>, request: tiny_http::Request) -> JoinHandle<()> {
    let dispatcher = Arc::clone(dispatcher);
    std::thread::spawn(move || handle_request(&dispatcher, request))
}

/// Serve until a shutdown is requested, one thread per request.
pub fn run_server(dispatcher: &Arc<Dispatcher>, addr: &str) -> Result<(), ServerError> {
    let server = Server::http(addr).map_err(|e| ServerError::Bind {
        addr: addr.to_owned(),
        message: e.to_string(),
    })?;
    info!("listening on {addr}");
    serve_until(dispatcher, &server, shutdown_requested)
}

/// Accept events on `server` until `stop` returns true.
///
/// Returns only once every accepted event has been acknowledged and answered.
pub fn serve_until(
    dispatcher: &Arc<Dispatcher>,
    server: &Server,
    stop: impl Fn() -> bool,
) -> Result<(), ServerError> {
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
    let mut outcome = Ok(());
    while !stop() {
        match server.recv_timeout(Duration::from_millis(250)) {
            Ok(Some(request)) => {
                in_flight.retain(|handle| !handle.is_finished());
                in_flight.push(spawn_handler(dispatcher, request));
            }
            Ok(None) => {}
            Err(e) => {
                outcome = Err(e.into());
                break;
            }
        }
    }
    info!("stopped accepting events");

    in_flight.retain(|handle| !handle.is_finished());
    if !in_flight.is_empty() {
        info!("waiting for {} in-flight events", in_flight.len());
    }
    for handle in in_flight {
        if handle.join().is_err() {
            error!("event handler thread panicked");
        }
    }
    outcome
}

/// A stackhook server on a random local port, running in a background thread.
///
/// Drop the `TestServer` to stop it (via `Server::unblock`).
pub struct TestServer {
    pub url: String,
    pub port: u16,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    pub fn start(dispatcher: Dispatcher) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let dispatcher = Arc::new(dispatcher);
        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                spawn_handler(&dispatcher, request);
            }
        });

        Self {
            url,
            port,
            server,
            _handle: handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

/// One request received by a [`CallbackSink`].
#[derive(Debug, Clone)]
pub struct ReceivedCallback {
    pub method: String,
    pub url: String,
    /// `(lowercased name, value)` pairs.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReceivedCallback {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("callback body is JSON")
    }
}

/// Stands in for the orchestrator's presigned callback URL.
pub struct CallbackSink {
    pub url: String,
    received: Arc<Mutex<Vec<ReceivedCallback>>>,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl CallbackSink {
    pub fn start() -> Self {
        Self::with_status(200)
    }

    /// A sink that answers every request with `status`.
    pub fn with_status(status: u16) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind callback sink"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let received = Arc::new(Mutex::new(Vec::new()));

        let srv = Arc::clone(&server);
        let log = Arc::clone(&received);
        let handle = std::thread::spawn(move || {
            for mut request in srv.incoming_requests() {
                let body = read_body(&mut request).unwrap_or_default();
                let captured = ReceivedCallback {
                    method: request.method().to_string(),
                    url: request.url().to_owned(),
                    headers: request
                        .headers()
                        .iter()
                        .map(|h| (h.field.to_string().to_ascii_lowercase(), h.value.to_string()))
                        .collect(),
                    body,
                };
                log.lock().expect("sink log poisoned").push(captured);
                let _ = request.respond(Response::empty(status));
            }
        });

        Self {
            url: format!("http://127.0.0.1:{port}"),
            received,
            server,
            _handle: handle,
        }
    }

    /// A callback URL on this sink.
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}/{}", self.url, path_and_query.trim_start_matches('/'))
    }

    pub fn received(&self) -> Vec<ReceivedCallback> {
        self.received.lock().expect("sink log poisoned").clone()
    }
}

impl Drop for CallbackSink {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
