//! Connection handling
//!
//! Manages individual client connections, parsing RESP commands
//! and sending responses.

use crate::dispatch::Session;
use crate::protocol::{RespEncoder, RespParser, RespValue};
use anyhow::Context;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Connection handler
pub struct Connection<S> {
    stream: S,

    /// Read buffer, may hold pipelined requests
    read_buffer: BytesMut,

    /// Write buffer
    write_buffer: BytesMut,

    /// Set once the peer hung up (EOF or read error)
    peer_closed: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new connection handler
    pub fn new(stream: S) -> Self {
        Connection {
            stream,
            read_buffer: BytesMut::with_capacity(4096),
            write_buffer: BytesMut::with_capacity(4096),
            peer_closed: false,
        }
    }

    /// Handle the connection
    ///
    /// Reads commands from the client, runs them through `session` and sends
    /// the replies, until the peer disconnects, sends QUIT or breaks the
    /// protocol.
    pub async fn handle(&mut self, mut session: Session) -> anyhow::Result<()> {
        loop {
            loop {
                match RespParser::parse(&mut self.read_buffer) {
                    Ok(Some(request)) => {
                        debug!("Parsed command: {}", request);
                        let (returned, reply) = self.execute(session, request).await?;
                        session = returned;

                        // A half-closed peer may still be reading
                        if let Err(e) = self.send_response(&reply).await {
                            if self.peer_closed {
                                debug!("Peer went away before the reply: {:#}", e);
                                return Ok(());
                            }
                            return Err(e);
                        }
                        if session.close_requested() {
                            return Ok(());
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Protocol error: {}", e);
                        self.send_response(&RespValue::error(format!("ERR {}", e)))
                            .await?;
                        return Ok(());
                    }
                }
            }

            if self.peer_closed {
                return Ok(());
            }
            let n = self
                .stream
                .read_buf(&mut self.read_buffer)
                .await
                .context("failed to read from client")?;
            if n == 0 {
                return Ok(());
            }
            debug!("Read {} bytes", n);
        }
    }

    /// Run one request on the blocking pool.
    ///
    /// The socket keeps being read meanwhile, so pipelined bytes are buffered
    /// and a hang-up cancels a command that is blocked waiting for data.
    /// Commands that are not waiting run to completion regardless.
    async fn execute(
        &mut self,
        mut session: Session,
        request: RespValue,
    ) -> anyhow::Result<(Session, RespValue)> {
        let cancel = session.cancel_handle();
        let mut task = tokio::task::spawn_blocking(move || {
            let reply = session.dispatch(request);
            (session, reply)
        });

        loop {
            tokio::select! {
                joined = &mut task => {
                    return joined.context("command task failed");
                }
                read = self.stream.read_buf(&mut self.read_buffer), if !self.peer_closed => {
                    match read {
                        Ok(0) => {
                            self.peer_closed = true;
                            cancel.cancel();
                        }
                        Ok(n) => debug!("Buffered {} bytes while a command is running", n),
                        Err(e) => {
                            debug!("Read error while a command is running: {}", e);
                            self.peer_closed = true;
                            cancel.cancel();
                        }
                    }
                }
            }
        }
    }

    /// Send a response to the client
    async fn send_response(&mut self, response: &RespValue) -> anyhow::Result<()> {
        self.write_buffer.clear();
        RespEncoder::encode_to(&mut self.write_buffer, response);

        self.stream
            .write_all(&self.write_buffer)
            .await
            .context("failed to write reply")?;
        self.stream.flush().await.context("failed to flush reply")?;

        Ok(())
    }
}
