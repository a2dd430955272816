//! [`StreamServer`] – live camera view over `multipart/x-mixed-replace`.
//!
//! * `GET /` → `301` to `/index.html`.
//! * `GET /index.html` → a page embedding the stream.
//! * `GET /stream.mjpg` → an endless sequence of JPEG parts, one per frame
//!   published on the [`FrameBus`].
//! * anything else → 404.
//!
//! Each viewer runs in its own task and only ever touches its own socket and
//! its own [`FrameSubscriber`].  A viewer that goes away ends that task and
//! nothing else.
//!
//! A viewer is gone once its socket reports end of stream or a part cannot
//! be written within the write timeout.  Clients that half-close their write
//! side after the request are therefore dropped too; browsers never do this.

use std::net::SocketAddr;
use std::time::Duration;

use rover_middleware::{Frame, FrameBus};
use rover_types::RoverError;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::http::{Response, read_request};

/// Default TCP port for the stream server.
pub const DEFAULT_STREAM_PORT: u16 = 8000;

/// Multipart boundary separating JPEG parts.
pub const BOUNDARY: &str = "FRAME";

/// Default bound on writing one frame part to a viewer.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub const STREAM_PAGE: &str = "<html>\n\
<head>\n\
<title>Rover Camera</title>\n\
</head>\n\
<body>\n\
<h1>Rover Camera</h1>\n\
<img src=\"stream.mjpg\" width=\"640\" height=\"480\">\n\
</body>\n\
</html>\n";

pub struct StreamServer {
    bus: FrameBus,
    addr: SocketAddr,
    write_timeout: Duration,
}

impl StreamServer {
    /// Create a server for `bus` on `0.0.0.0:`[`DEFAULT_STREAM_PORT`].
    pub fn new(bus: FrameBus) -> Self {
        Self {
            bus,
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_STREAM_PORT)),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Bound the time spent writing a single part to one viewer.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the configured address and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::Io`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), RoverError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| RoverError::Io(format!("stream server bind error on {}: {e}", self.addr)))?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<(), RoverError> {
        let local = listener
            .local_addr()
            .map_err(|e| RoverError::Io(e.to_string()))?;
        info!(addr = %local, "stream server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bus = self.bus.clone();
                    let write_timeout = self.write_timeout;
                    let span = info_span!("viewer", id = %Uuid::new_v4(), peer = %peer);
                    tokio::spawn(
                        async move {
                            match handle_connection(stream, &bus, write_timeout).await {
                                Ok(()) => {}
                                Err(RoverError::ClientDisconnected(reason)) => {
                                    info!(reason = %reason, "viewer disconnected");
                                }
                                Err(e) => debug!(error = %e, "stream client error"),
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => error!(error = %e, "stream accept error"),
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    bus: &FrameBus,
    write_timeout: Duration,
) -> Result<(), RoverError> {
    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };
    if request.method != "GET" {
        return Response::text(405, "Method Not Allowed")
            .write_to(&mut stream)
            .await;
    }
    match request.path.as_str() {
        "/" => Response::redirect("/index.html").write_to(&mut stream).await,
        "/index.html" => Response::html(STREAM_PAGE).write_to(&mut stream).await,
        "/stream.mjpg" => stream_frames(stream, bus, write_timeout).await,
        _ => Response::not_found().write_to(&mut stream).await,
    }
}

/// Response head for the multipart stream.
pub(crate) fn stream_head() -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Age: 0\r\n\
         Cache-Control: no-cache, private\r\n\
         Pragma: no-cache\r\n\
         Content-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\n\
         \r\n"
    )
}

/// One multipart part carrying `frame`.
pub(crate) fn frame_part(frame: &Frame) -> Vec<u8> {
    let mut part = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    )
    .into_bytes();
    part.extend_from_slice(frame.as_bytes());
    part.extend_from_slice(b"\r\n");
    part
}

/// Forward every new frame to the viewer until it goes away.
///
/// Returns [`RoverError::ClientDisconnected`] when the viewer closes its end
/// or a part cannot be written within `write_timeout`, and
/// [`RoverError::StreamClosed`] once the bus itself is gone.
async fn stream_frames(
    stream: TcpStream,
    bus: &FrameBus,
    write_timeout: Duration,
) -> Result<(), RoverError> {
    let (mut reader, mut writer) = stream.into_split();
    let mut frames = bus.subscribe();

    write_bounded(&mut writer, stream_head().as_bytes(), write_timeout).await?;
    info!(viewers = bus.viewer_count(), "viewer attached");

    let mut scratch = [0u8; 512];
    loop {
        tokio::select! {
            frame = frames.wait_for_next() => {
                write_bounded(&mut writer, &frame_part(&frame?), write_timeout).await?;
            }
            read = reader.read(&mut scratch) => match read {
                Ok(0) => return Err(RoverError::ClientDisconnected("viewer closed connection".to_string())),
                // Anything a viewer sends after its request is ignored.
                Ok(_) => {}
                Err(e) => return Err(RoverError::ClientDisconnected(e.to_string())),
            },
        }
    }
}

async fn write_bounded<W>(writer: &mut W, bytes: &[u8], limit: Duration) -> Result<(), RoverError>
where
    W: AsyncWrite + Unpin,
{
    match timeout(limit, writer.write_all(bytes)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RoverError::ClientDisconnected(e.to_string())),
        Err(_) => Err(RoverError::ClientDisconnected(format!(
            "write stalled for {} ms",
            limit.as_millis()
        ))),
    }
}
