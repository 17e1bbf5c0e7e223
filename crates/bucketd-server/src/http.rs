use crate::access_log::AccessLog;
use crate::dispatch::{Dispatcher, Outcome};
use crate::pipeline::{Pipeline, Recovery, Reply, RequestInfo};
use crate::router::{parse_key_route, KeyMethod};
use crate::ServerError;
use bucketd_core::{InFlight, Lifecycle, ShutdownReport};
use bucketd_store::{KvBackend, StoreOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tiny_http::{Header, Response, Server, StatusCode};
use tracing::{debug, error, info};

/// Everything a request thread needs: the dispatcher, the interceptor
/// pipeline and the in-flight tracker that gates intake.
pub struct App {
    dispatcher: Dispatcher,
    pipeline: Pipeline,
    in_flight: Arc<InFlight>,
}

impl App {
    /// Standard pipeline: access log outermost, then fault recovery.
    pub fn new(backend: Arc<dyn KvBackend>, access_log: AccessLog, in_flight: Arc<InFlight>) -> Self {
        let pipeline = Pipeline::new().with(access_log).with(Recovery);
        Self::with_pipeline(backend, pipeline, in_flight)
    }

    pub fn with_pipeline(
        backend: Arc<dyn KvBackend>,
        pipeline: Pipeline,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(backend),
            pipeline,
            in_flight,
        }
    }

    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }
}

fn request_info(req: &tiny_http::Request) -> RequestInfo {
    let remote = req
        .remote_addr()
        .map_or_else(|| "-".to_owned(), ToString::to_string);
    RequestInfo::new(req.method().to_string(), req.url(), remote)
}

fn read_body(req: &mut tiny_http::Request) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    req.as_reader().read_to_end(&mut body)?;
    Ok(body)
}

fn respond(req: tiny_http::Request, reply: &Reply) {
    let mut response = Response::from_data(reply.body.clone().into_bytes())
        .with_status_code(StatusCode(reply.status));
    if let Ok(header) = Header::from_bytes("Content-Type", reply.content_type) {
        response = response.with_header(header);
    }
    if let Err(e) = req.respond(response) {
        debug!("failed to send response: {e}");
    }
}

/// Handle one admitted request: route, read the body, dispatch, respond.
///
/// Everything from routing to dispatch runs inside the pipeline, so a fault
/// anywhere in it becomes a `-500` envelope and is still access-logged.
pub fn handle_request(app: &App, mut req: tiny_http::Request) {
    let info = request_info(&req);
    debug!("{} {}", info.method, info.url);

    let reply = app.pipeline.run(&info, || {
        let (Some(method), Some(key)) = (KeyMethod::parse(&info.method), parse_key_route(&info.url))
        else {
            return Reply::not_found();
        };
        let body = if method.has_body() {
            match read_body(&mut req) {
                Ok(body) => body,
                Err(e) => {
                    return Reply::outcome(&Outcome::Invalid(format!(
                        "failed to read request body: {e}"
                    )))
                }
            }
        } else {
            Vec::new()
        };
        Reply::outcome(&app.dispatcher.execute(method.operation(key, body)))
    });

    respond(req, &reply);
}

/// Answer a request that arrived after intake closed.
fn reject_request(app: &App, req: tiny_http::Request) {
    let info = request_info(&req);
    let reply = app.pipeline.run(&info, || {
        Reply::outcome(&Outcome::Failed("server is shutting down".to_owned()))
    });
    respond(req, &reply);
}

fn accept_loop(server: &Server, app: &Arc<App>) {
    for request in server.incoming_requests() {
        let Some(guard) = app.in_flight.try_enter() else {
            reject_request(app, request);
            continue;
        };
        let app = Arc::clone(app);
        let spawned = thread::Builder::new()
            .name("bucketd-request".to_owned())
            .spawn(move || {
                handle_request(&app, request);
                // Release the app before the guard so a drained shutdown sees
                // the store unshared.
                drop(app);
                drop(guard);
            });
        if let Err(e) = spawned {
            error!("failed to spawn request thread: {e}");
        }
    }
    debug!("accept loop stopped");
}

/// A listening HTTP server with one thread per admitted request.
pub struct HttpServer {
    server: Arc<Server>,
    addr: SocketAddr,
    accept: Option<JoinHandle<()>>,
}

impl HttpServer {
    pub fn bind(addr: &str, app: Arc<App>) -> Result<Self, ServerError> {
        let server = Server::http(addr).map_err(|e| ServerError::Bind {
            addr: addr.to_owned(),
            message: e.to_string(),
        })?;
        let server = Arc::new(server);
        let local = server.server_addr().to_ip().ok_or_else(|| ServerError::Bind {
            addr: addr.to_owned(),
            message: "not an IP address".to_owned(),
        })?;

        let srv = Arc::clone(&server);
        let accept = thread::Builder::new()
            .name("bucketd-accept".to_owned())
            .spawn(move || accept_loop(&srv, &app))?;

        Ok(Self {
            server,
            addr: local,
            accept: Some(accept),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop taking connections and wait for the accept loop to exit.
    /// Requests already handed to worker threads keep running.
    pub fn stop_accepting(&mut self) {
        if let Some(handle) = self.accept.take() {
            self.server.unblock();
            if handle.join().is_err() {
                error!("accept loop panicked");
            }
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop_accepting();
    }
}

/// A bucketd server on a random local port, for integration testing.
///
/// [`start`](Self::start) runs the full stack: a store under `data_dir`, the
/// lifecycle manager, and an access log at `data_dir/access.log`.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub access_log: PathBuf,
    server: HttpServer,
    in_flight: Arc<InFlight>,
    lifecycle: Option<Lifecycle>,
}

impl TestServer {
    pub fn start(data_dir: PathBuf) -> Self {
        Self::start_with_grace(data_dir, Duration::from_secs(5))
    }

    pub fn start_with_grace(data_dir: PathBuf, grace_period: Duration) -> Self {
        let options = StoreOptions::new(data_dir.join("bucketd.db"));
        let lifecycle = Lifecycle::start(options, grace_period).expect("failed to start lifecycle");
        let backend: Arc<dyn KvBackend> = lifecycle.store();
        let in_flight = lifecycle.in_flight();
        Self::launch(data_dir, backend, in_flight, Some(lifecycle))
    }

    /// Serve an arbitrary backend, without a lifecycle manager.
    pub fn with_backend(data_dir: PathBuf, backend: Arc<dyn KvBackend>) -> Self {
        Self::launch(data_dir, backend, InFlight::new(), None)
    }

    fn launch(
        data_dir: PathBuf,
        backend: Arc<dyn KvBackend>,
        in_flight: Arc<InFlight>,
        lifecycle: Option<Lifecycle>,
    ) -> Self {
        std::fs::create_dir_all(&data_dir).expect("failed to create test data dir");
        let access_log = data_dir.join("access.log");
        let log = AccessLog::open(&access_log).expect("failed to open access log");
        let app = Arc::new(App::new(backend, log, Arc::clone(&in_flight)));
        let server = HttpServer::bind("127.0.0.1:0", app).expect("failed to bind test HTTP server");
        let port = server.local_addr().port();
        info!("test server listening on 127.0.0.1:{port}");

        Self {
            url: format!("http://127.0.0.1:{port}"),
            port,
            data_dir,
            access_log,
            server,
            in_flight,
            lifecycle,
        }
    }

    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    /// Run the shutdown sequence: stop intake, drain, close the store.
    pub fn shutdown(mut self) -> Option<ShutdownReport> {
        self.in_flight.close_intake();
        self.server.stop_accepting();
        self.lifecycle.take().map(Lifecycle::shutdown)
    }
}
