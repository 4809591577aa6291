//! RPC server: accepts connections, performs the codec handshake, and
//! drives a per-connection request loop.
//!
//! Within one connection, request handling is concurrent (one task per
//! request) while responses are serialized through a per-connection send
//! lock, so frames never interleave on the wire. Response order is not
//! request order.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::codec::{lookup_codec, ByteStream, CodecReader, CodecWriter, Encoding};
use crate::error::{Result, RpcError};
use crate::protocol::{read_preamble, MAGIC_NUMBER};
use crate::service::Service;

/// RPC server holding the service map. Cloning is cheap and clones share
/// the same services.
#[derive(Clone, Default)]
pub struct Server {
    services: Arc<RwLock<HashMap<String, Arc<Service>>>>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `service`. Registration is one-shot per name: registering a
    /// second service under the same name fails and the first entry stays.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        let name = service.name().to_string();
        if services.contains_key(&name) {
            return Err(RpcError::ServiceAlreadyDefined(name));
        }
        services.insert(name, Arc::new(service));
        Ok(())
    }

    /// Accept connections until the listener fails, serving each one on its
    /// own task.
    pub async fn accept(&self, listener: TcpListener) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("rpc server: accept error: {e}");
                    return;
                }
            };
            debug!("rpc server: connection from {peer}");
            let server = self.clone();
            tokio::spawn(async move {
                server.serve_conn(stream).await;
            });
        }
    }

    /// Serve a single connection over any byte stream. Returns once the
    /// read side ends and every in-flight handler has written its response.
    pub async fn serve_conn<S>(&self, stream: S)
    where
        S: ByteStream + 'static,
    {
        // Buffered so the preamble line read cannot swallow frame bytes.
        let mut stream = BufReader::new(stream);
        let preamble = match read_preamble(&mut stream).await {
            Ok(preamble) => preamble,
            Err(e) => {
                warn!("rpc server: options error: {e}");
                return;
            }
        };
        if preamble.magic_number != MAGIC_NUMBER {
            warn!("{}", RpcError::InvalidMagicNumber(preamble.magic_number));
            return;
        }
        let Some(new_codec) = lookup_codec(&preamble.codec_type) else {
            warn!("rpc server: invalid codec type {}", preamble.codec_type);
            return;
        };
        let (reader, writer) = new_codec(Box::new(stream));
        self.serve_codec(reader, writer).await;
    }

    /// The request loop: read header + body, spawn a handler per request,
    /// keep reading. Ends when the read side fails, then waits out the
    /// handlers before closing the codec.
    async fn serve_codec(
        &self,
        mut reader: Box<dyn CodecReader>,
        writer: Box<dyn CodecWriter>,
    ) {
        let sending = Arc::new(Mutex::new(writer));
        let encoding = reader.encoding();
        // Wait-group: each handler holds a sender clone; once the loop drops
        // the original, recv() resolves when the last handler finishes.
        let (handlers_tx, mut handlers_rx) = mpsc::channel::<()>(1);

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(e) => {
                    debug!("rpc server: read header error: {e}");
                    break;
                }
            };
            // The body unit is consumed even when dispatch will fail;
            // leaving it unread would desynchronize every later frame.
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(e) => {
                    debug!("rpc server: read body error: {e}");
                    break;
                }
            };

            let lookup = self.find_service(&header.service_method);
            let sending = sending.clone();
            let guard = handlers_tx.clone();
            tokio::spawn(async move {
                let _guard = guard;
                let mut response = header;
                let reply = match lookup {
                    Ok((service, method)) => match service.call(&method, encoding, &body) {
                        Ok(reply) => reply,
                        Err(e) => {
                            response.error = e.to_string();
                            placeholder(encoding)
                        }
                    },
                    Err(e) => {
                        response.error = e.to_string();
                        placeholder(encoding)
                    }
                };
                let mut writer = sending.lock().await;
                if let Err(e) = writer.write(&response, &reply).await {
                    error!("rpc server: write response error: {e}");
                }
            });
        }

        drop(handlers_tx);
        let _ = handlers_rx.recv().await;
        let mut writer = sending.lock().await;
        if let Err(e) = writer.close().await {
            debug!("rpc server: close error: {e}");
        }
    }

    /// Split `"Service.Method"` at the last `.` and resolve the service.
    fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, String)> {
        let Some((service_name, method_name)) = service_method.rsplit_once('.') else {
            return Err(RpcError::IllFormed(service_method.to_string()));
        };
        if service_name.is_empty() || method_name.is_empty() {
            return Err(RpcError::IllFormed(service_method.to_string()));
        }
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        let service = services
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;
        Ok((service, method_name.to_string()))
    }
}

/// Body stood in for a reply when the response only carries an error.
fn placeholder(encoding: Encoding) -> Vec<u8> {
    encoding.encode(&()).unwrap_or_default()
}

static DEFAULT_SERVER: LazyLock<Server> = LazyLock::new(Server::new);

/// Register `service` with the process-wide default server.
pub fn register(service: Service) -> Result<()> {
    DEFAULT_SERVER.register(service)
}

/// Accept connections on the process-wide default server.
pub async fn accept(listener: TcpListener) {
    DEFAULT_SERVER.accept(listener).await
}

/// Serve one stream on the process-wide default server.
pub async fn serve_conn<S>(stream: S)
where
    S: ByteStream + 'static,
{
    DEFAULT_SERVER.serve_conn(stream).await
}
