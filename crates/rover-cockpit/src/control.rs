//! [`ControlServer`] – operator control page and the `/action` endpoint.
//!
//! * `GET /` → the compiled-in control page (or a configured replacement).
//! * `GET /action` → runs the action named by the `myaction` header (or the
//!   `action` query parameter) and answers with the cached moisture reading
//!   as plain text.
//! * anything else → 404.

use std::net::SocketAddr;
use std::sync::Arc;

use rover_runtime::{ActionOutcome, RoverDispatcher};
use rover_types::RoverError;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{Request, Response, read_request};
use crate::stream::DEFAULT_STREAM_PORT;

/// Default TCP port for the control server.
pub const DEFAULT_CONTROL_PORT: u16 = 8080;

/// Request header carrying the action name.
pub const ACTION_HEADER: &str = "myaction";

/// Response header set when the action name was not recognized.
pub const OUTCOME_HEADER: &str = "X-Rover-Outcome";

/// Placeholder in the landing page replaced by the stream server's port.
pub const STREAM_PORT_PLACEHOLDER: &str = "{{STREAM_PORT}}";

const CONTROL_HTML: &str = include_str!("control.html");

pub struct ControlServer {
    dispatcher: Arc<RoverDispatcher>,
    addr: SocketAddr,
    landing: String,
    stream_port: u16,
}

impl ControlServer {
    /// Create a server for `dispatcher` on `0.0.0.0:`[`DEFAULT_CONTROL_PORT`].
    pub fn new(dispatcher: Arc<RoverDispatcher>) -> Self {
        Self {
            dispatcher,
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_CONTROL_PORT)),
            landing: CONTROL_HTML.to_string(),
            stream_port: DEFAULT_STREAM_PORT,
        }
    }

    /// Override the listening address (builder-style).
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Replace the compiled-in control page.  Any
    /// [`STREAM_PORT_PLACEHOLDER`] in it is filled in when served.
    pub fn with_landing_page(mut self, html: impl Into<String>) -> Self {
        self.landing = html.into();
        self
    }

    /// Port the landing page points the camera view at.
    pub fn with_stream_port(mut self, port: u16) -> Self {
        self.stream_port = port;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The landing page as served.
    pub fn landing_page(&self) -> String {
        self.landing
            .replace(STREAM_PORT_PLACEHOLDER, &self.stream_port.to_string())
    }

    /// Bind the configured address and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::Io`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), RoverError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| RoverError::Io(format!("control server bind error on {}: {e}", self.addr)))?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RoverError> {
        let local = listener
            .local_addr()
            .map_err(|e| RoverError::Io(e.to_string()))?;
        info!(addr = %local, stream_port = self.stream_port, "control server listening");

        let landing: Arc<str> = Arc::from(self.landing_page());
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let landing = Arc::clone(&landing);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &dispatcher, &landing).await {
                            debug!(peer = %peer, error = %e, "control client error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "control accept error"),
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    dispatcher: &RoverDispatcher,
    landing: &str,
) -> Result<(), RoverError> {
    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };
    route(&request, dispatcher, landing)
        .await
        .write_to(&mut stream)
        .await
}

pub(crate) async fn route(request: &Request, dispatcher: &RoverDispatcher, landing: &str) -> Response {
    if request.method != "GET" {
        return Response::text(405, "Method Not Allowed");
    }
    match request.path.as_str() {
        "/" | "/index.html" => Response::html(landing),
        "/action" => {
            let action = request
                .header(ACTION_HEADER)
                .map(str::to_string)
                .or_else(|| request.query_param("action"))
                .unwrap_or_default();
            info!(action = %action, "requested action");
            action_response(dispatcher, &action).await
        }
        _ => Response::not_found(),
    }
}

async fn action_response(dispatcher: &RoverDispatcher, action: &str) -> Response {
    match dispatcher.dispatch(action).await {
        Ok(report) => {
            let mut response = Response::text(200, report.moisture.to_string());
            if let Some(at) = report.moisture.measured_at() {
                let stamp = at.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
                response = response.with_header("Last-Modified", stamp);
            }
            match report.outcome {
                ActionOutcome::Ignored { .. } => response.with_header(OUTCOME_HEADER, "ignored"),
                _ => response,
            }
        }
        Err(e @ RoverError::LinkTimeout { .. }) => {
            warn!(action, error = %e, "controller did not answer");
            Response::text(504, e.to_string())
        }
        Err(e) => {
            warn!(action, error = %e, "action failed");
            Response::text(502, e.to_string())
        }
    }
}
