//! RPC client: one connection, many in-flight calls correlated by `seq`.
//!
//! Submissions register a pending entry keyed by sequence number, then
//! write the request under the send lock. A dedicated receive task matches
//! response headers back to pending entries and delivers each completed
//! [`Call`] on its `done` channel. When the connection dies, every call
//! still pending is failed with the terminating error, exactly once.
//!
//! Lock order: wherever the send lock (codec writer) and the state lock are
//! both held, the send lock is acquired first. The termination path relies
//! on this; violating it elsewhere would deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::codec::{lookup_codec, ByteStream, CodecReader, CodecWriter, Encoding, MSGPACK_CODEC};
use crate::error::{Result, RpcError};
use crate::protocol::{write_preamble, Header, Preamble};

/// Capacity of the completion channel [`Client::go`] allocates when the
/// caller supplies none. Buffered so a slow caller does not stall the
/// receive loop.
const DEFAULT_DONE_CAPACITY: usize = 10;

/// Connection options. The magic number is a protocol constant and is not
/// an option.
#[derive(Debug, Clone)]
pub struct Options {
    /// Registered name of the codec to negotiate.
    pub codec_type: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            codec_type: MSGPACK_CODEC.to_string(),
        }
    }
}

/// A completed call, delivered on its `done` channel.
#[derive(Debug)]
pub struct Call {
    /// Sequence number the client assigned; unique per client lifetime.
    pub seq: u64,
    /// Target in `"Service.Method"` form.
    pub service_method: String,
    /// Dispatch, transport, or handler error; `None` on success.
    pub error: Option<RpcError>,
    reply: Bytes,
    encoding: Encoding,
}

impl Call {
    /// Decode the reply body, or surface the call's error.
    pub fn reply<R: DeserializeOwned>(self) -> Result<R> {
        match self.error {
            Some(e) => Err(e),
            None => self
                .encoding
                .decode(&self.reply)
                .map_err(|e| RpcError::ReadBody(e.to_string())),
        }
    }
}

struct PendingCall {
    service_method: String,
    done: mpsc::Sender<Call>,
}

struct ClientState {
    /// Next sequence number; starts at 1, 0 is reserved as invalid.
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    /// User called close.
    closing: bool,
    /// Peer or transport failure observed by the receive loop.
    shutdown: bool,
}

struct ClientInner {
    /// Send lock. Nests outside the state lock.
    writer: Mutex<Box<dyn CodecWriter>>,
    state: StdMutex<ClientState>,
    encoding: Encoding,
}

impl ClientInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// RPC client. Cloning is cheap and clones share the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Connect over TCP with the default codec.
    pub async fn dial(addr: &str) -> Result<Client> {
        Self::dial_with_options(addr, Options::default()).await
    }

    /// Connect over TCP with explicit options.
    pub async fn dial_with_options(addr: &str, options: Options) -> Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream, options).await
    }

    /// Install the client over any byte stream: look up the codec, write
    /// the preamble, and spawn the receive task.
    pub async fn new<S>(stream: S, options: Options) -> Result<Client>
    where
        S: ByteStream + 'static,
    {
        let Some(new_codec) = lookup_codec(&options.codec_type) else {
            return Err(RpcError::InvalidCodecType(options.codec_type));
        };
        let mut stream = stream;
        write_preamble(&mut stream, &Preamble::new(options.codec_type)).await?;

        let (reader, writer) = new_codec(Box::new(stream));
        let encoding = reader.encoding();
        let inner = Arc::new(ClientInner {
            writer: Mutex::new(writer),
            state: StdMutex::new(ClientState {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            encoding,
        });
        tokio::spawn(Self::receive(inner.clone(), reader));
        Ok(Client { inner })
    }

    /// Submit an asynchronous call.
    ///
    /// With `done: None` a small buffered completion channel is allocated
    /// and its receiver returned; a caller-supplied sender is used as-is
    /// and `Ok(None)` is returned.
    /// The completed [`Call`] arrives on the channel in both cases, its
    /// `error` set if anything went wrong after submission.
    pub async fn go<A>(
        &self,
        service_method: &str,
        args: &A,
        done: Option<mpsc::Sender<Call>>,
    ) -> Result<Option<mpsc::Receiver<Call>>>
    where
        A: Serialize + ?Sized,
    {
        let (done, receiver) = match done {
            Some(done) => (done, None),
            None => {
                let (tx, rx) = mpsc::channel(DEFAULT_DONE_CAPACITY);
                (tx, Some(rx))
            }
        };
        let body = self.inner.encoding.encode(args)?;
        self.send(service_method, body, done).await?;
        Ok(receiver)
    }

    /// Submit a call and block until its completion arrives.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let (tx, mut rx) = mpsc::channel(1);
        self.go(service_method, args, Some(tx)).await?;
        let call = rx.recv().await.ok_or(RpcError::Shutdown)?;
        call.reply()
    }

    /// Close the connection. Closing twice, or closing after the transport
    /// already failed, returns the shutdown error instead of touching the
    /// stream again.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.lock_state();
            if state.closing || state.shutdown {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        let mut writer = self.inner.writer.lock().await;
        writer.close().await
    }

    /// False once the user closed the connection or the transport failed.
    pub fn is_available(&self) -> bool {
        let state = self.inner.lock_state();
        !state.shutdown && !state.closing
    }

    /// Register the call and write header + args under the send lock.
    async fn send(&self, service_method: &str, body: Vec<u8>, done: mpsc::Sender<Call>) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        let seq = self.register_call(service_method, done)?;
        let header = Header::request(service_method, seq);
        if let Err(e) = writer.write(&header, &body).await {
            // Removing before signalling keeps the signal unique: the
            // termination path only drains what is still pending.
            if let Some(pending) = self.remove_call(seq) {
                drop(writer);
                let call = Call {
                    seq,
                    service_method: pending.service_method,
                    error: Some(e),
                    reply: Bytes::new(),
                    encoding: self.inner.encoding,
                };
                let _ = pending.done.send(call).await;
            }
        }
        Ok(())
    }

    fn register_call(&self, service_method: &str, done: mpsc::Sender<Call>) -> Result<u64> {
        let mut state = self.inner.lock_state();
        if state.closing || state.shutdown {
            return Err(RpcError::Shutdown);
        }
        let seq = state.seq;
        state.seq += 1;
        state.pending.insert(
            seq,
            PendingCall {
                service_method: service_method.to_string(),
                done,
            },
        );
        Ok(seq)
    }

    fn remove_call(&self, seq: u64) -> Option<PendingCall> {
        self.inner.lock_state().pending.remove(&seq)
    }

    /// The per-connection receive loop. Runs until a header or body unit
    /// cannot be read, then terminates every pending call.
    async fn receive(inner: Arc<ClientInner>, mut reader: Box<dyn CodecReader>) {
        let err = loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(e) => break e,
            };
            let pending = inner.lock_state().pending.remove(&header.seq);
            match pending {
                // Nothing waits on this seq: the request may have partially
                // failed to send, or was already terminated. The body is
                // still consumed to keep framing alive.
                None => {
                    if let Err(e) = reader.read_body().await {
                        break e;
                    }
                }
                Some(pending) => {
                    let mut read_err = None;
                    let (error, reply) = if !header.error.is_empty() {
                        // The header carries the failure; the body is a
                        // placeholder to discard.
                        if let Err(e) = reader.read_body().await {
                            read_err = Some(e);
                        }
                        (Some(RpcError::Remote(header.error)), Bytes::new())
                    } else {
                        match reader.read_body().await {
                            Ok(body) => (None, body),
                            Err(e) => {
                                let annotated = RpcError::ReadBody(e.to_string());
                                read_err = Some(e);
                                (Some(annotated), Bytes::new())
                            }
                        }
                    };
                    let call = Call {
                        seq: header.seq,
                        service_method: pending.service_method,
                        error,
                        reply,
                        encoding: inner.encoding,
                    };
                    let _ = pending.done.send(call).await;
                    if let Some(e) = read_err {
                        break e;
                    }
                }
            }
        };
        Self::terminate_calls(&inner, err).await;
    }

    /// Fail every still-pending call with the terminating error. Send lock
    /// first, then state lock, mirroring the submission path.
    async fn terminate_calls(inner: &Arc<ClientInner>, err: RpcError) {
        let writer = inner.writer.lock().await;
        let drained: Vec<(u64, PendingCall)> = {
            let mut state = inner.lock_state();
            state.shutdown = true;
            state.pending.drain().collect()
        };
        drop(writer);

        if !drained.is_empty() {
            debug!("rpc client: failing {} pending calls: {err}", drained.len());
        }
        let message = err.to_string();
        for (seq, pending) in drained {
            let call = Call {
                seq,
                service_method: pending.service_method,
                error: Some(RpcError::ConnectionLost(message.clone())),
                reply: Bytes::new(),
                encoding: inner.encoding,
            };
            let _ = pending.done.send(call).await;
        }
    }
}
