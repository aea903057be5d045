//! On-demand header query service.
//!
//! A TCP server answering one request per connection. The request is a single line of
//! space-separated tokens; the response is the serialized [`Reply`] of the registered
//! [`QueryHandler`], after which the connection is closed.
//!
//! ```text
//! hdr <frameid> <mode> <itime> [fullHeader]   -> FITS header text
//! seqno [num] [type]                          -> newline-joined frame ids
//! anything else                               -> header with one COMMENT card
//! ```
//!
//! Handler failures never reach the peer as a dropped connection: they are logged and
//! answered with an empty header (only the `END` card).

use crate::config::QueryServerConfig;
use crate::dispatch::Reply;
use crate::error::{AppResult, PersonalityError};
use crate::header::AssembledHeader;
use crate::value::StatusValue;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Turns request text into a reply.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle(&self, request: &str) -> AppResult<Reply>;
}

/// A parsed query line.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryRequest {
    Header {
        frame_id: StatusValue,
        mode: String,
        exposure_seconds: f64,
        full_header: bool,
    },
    FrameIds {
        count: u32,
        frame_type: String,
    },
    Unsupported(String),
}

impl QueryRequest {
    pub fn parse(request: &str) -> AppResult<Self> {
        let mut tokens = request.split_whitespace();
        let Some(command) = tokens.next() else {
            return Ok(Self::Unsupported(String::new()));
        };
        let args: Vec<&str> = tokens.collect();

        match command {
            "hdr" => {
                let [frame_id, mode, itime, rest @ ..] = args.as_slice() else {
                    return Err(PersonalityError::InvalidRequest(format!(
                        "usage: hdr <frameid> <mode> <itime> [fullHeader], got '{}'",
                        request
                    )));
                };
                let exposure_seconds = itime.parse::<f64>().map_err(|_| {
                    PersonalityError::invalid_argument("itime", format!("'{}' is not a number", itime))
                })?;
                let full_header = match rest.first() {
                    None => true,
                    Some(flag) => StatusValue::Str((*flag).to_string()).as_bool().ok_or_else(|| {
                        PersonalityError::invalid_argument("fullHeader", format!("'{}' is not a boolean", flag))
                    })?,
                };
                let frame_id = match frame_id.parse::<i64>() {
                    Ok(n) => StatusValue::Int(n),
                    Err(_) => StatusValue::Str((*frame_id).to_string()),
                };
                Ok(Self::Header {
                    frame_id,
                    mode: (*mode).to_string(),
                    exposure_seconds,
                    full_header,
                })
            }
            "seqno" => {
                let count = match args.first() {
                    None => 1,
                    Some(n) => n.parse::<u32>().map_err(|_| {
                        PersonalityError::invalid_argument("num", format!("'{}' is not a count", n))
                    })?,
                };
                let frame_type = args.get(1).copied().unwrap_or("A").to_string();
                Ok(Self::FrameIds { count, frame_type })
            }
            other => Ok(Self::Unsupported(other.to_string())),
        }
    }
}

/// Reply sent for a command the server does not recognize.
pub fn unsupported_reply(command: &str) -> Reply {
    let mut header = AssembledHeader::new();
    header.add_comment(format!("unsupported command: {}", command));
    Reply::Header(header)
}

pub struct QueryServer {
    listener: TcpListener,
    handler: Arc<dyn QueryHandler>,
    config: QueryServerConfig,
}

impl QueryServer {
    /// Bind `bind_address:port`. Port 0 picks an ephemeral port.
    pub async fn bind(config: &QueryServerConfig, handler: Arc<dyn QueryHandler>) -> AppResult<Self> {
        let listener = TcpListener::bind(config.address()).await?;
        info!("Query server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            handler,
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and answer connections until `shutdown` turns `true`.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = timeout(self.config.accept_timeout, self.listener.accept()) => {
                    match accepted {
                        Err(_) => continue,
                        Ok(Ok((stream, peer))) => self.answer(stream, peer).await,
                        Ok(Err(e)) => {
                            warn!("Query server accept failed: {}", e);
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
        info!("Query server stopped");
    }

    async fn answer(&self, mut stream: TcpStream, peer: SocketAddr) {
        let mut buf = vec![0u8; self.config.max_request_bytes];
        let n = match timeout(self.config.read_timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("Read from {} failed: {}", peer, e);
                0
            }
            Err(_) => {
                warn!("No request from {} within {:?}", peer, self.config.read_timeout);
                0
            }
        };
        let request = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        debug!("Query from {}: '{}'", peer, request);

        let handled = AssertUnwindSafe(self.handler.handle(&request))
            .catch_unwind()
            .await;
        let reply = match handled {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                error!("Query '{}' from {} failed: {}", request, peer, e);
                Reply::Header(AssembledHeader::new())
            }
            Err(panic) => {
                error!(
                    "Query '{}' from {} panicked: {}",
                    request,
                    peer,
                    panic_message(panic.as_ref())
                );
                Reply::Header(AssembledHeader::new())
            }
        };

        if let Err(e) = stream.write_all(&reply.to_bytes()).await {
            warn!("Write to {} failed: {}", peer, e);
        }
        if let Err(e) = stream.shutdown().await {
            debug!("Shutdown of {} failed: {}", peer, e);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Send one request and collect the full response.
pub async fn query(addr: &str, request: &str, limit: Duration) -> AppResult<Vec<u8>> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(request.as_bytes()).await?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        Ok::<_, std::io::Error>(response)
    };
    timeout(limit, exchange)
        .await
        .map_err(|_| PersonalityError::InvalidRequest(format!("no response from {} within {:?}", addr, limit)))?
        .map_err(PersonalityError::from)
}
