use std::collections::BTreeMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::call;
use super::read_frame;
use super::write_frame;
use super::FrameChannel;
use super::RemotingCommand;
use super::RpcService;
use super::Transport;
use crate::AppendEntryRequest;
use crate::AppendEntryResponse;
use crate::GetEntriesRequest;
use crate::GetEntriesResponse;
use crate::HeartBeatRequest;
use crate::HeartBeatResponse;
use crate::MetadataRequest;
use crate::MetadataResponse;
use crate::NetworkConfig;
use crate::NetworkError;
use crate::NodeId;
use crate::PullEntriesRequest;
use crate::PullEntriesResponse;
use crate::PushEntryRequest;
use crate::PushEntryResponse;
use crate::Result;
use crate::VoteRequest;
use crate::VoteResponse;

type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<RemotingCommand>>>>;

/// One multiplexed connection to a peer. Requests and responses are paired
/// by `opaque`.
struct PeerConnection {
    outbound: mpsc::UnboundedSender<RemotingCommand>,
    pending: PendingCalls,
    closed: CancellationToken,
}

impl PeerConnection {
    async fn connect(
        addr: &str,
        connect_timeout: Duration,
        max_frame_bytes: usize,
    ) -> Result<Arc<Self>> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::Timeout {
                node_id: addr.to_string(),
                duration: connect_timeout,
            })?
            .map_err(NetworkError::Io)?;
        stream.set_nodelay(true).map_err(NetworkError::Io)?;
        debug!("connected to {}", addr);

        let (mut reader, mut writer) = stream.into_split();
        let (outbound, mut rx) = mpsc::unbounded_channel::<RemotingCommand>();
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        let writer_closed = closed.clone();
        let writer_addr = addr.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    command = rx.recv() => match command {
                        Some(command) => {
                            if let Err(e) = write_frame(&mut writer, &command, max_frame_bytes).await {
                                warn!("write to {} failed: {}", writer_addr, e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            writer_closed.cancel();
        });

        let reader_closed = closed.clone();
        let reader_pending = pending.clone();
        let reader_addr = addr.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_closed.cancelled() => break,
                    frame = read_frame(&mut reader, max_frame_bytes) => match frame {
                        Ok(Some(command)) if command.response => {
                            if let Some(tx) = reader_pending.lock().remove(&command.opaque) {
                                let _ = tx.send(command);
                            }
                        }
                        Ok(Some(command)) => {
                            warn!("ignoring request frame {:?} from {}", command.code, reader_addr);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("read from {} failed: {}", reader_addr, e);
                            break;
                        }
                    },
                }
            }
            reader_closed.cancel();
            // dropping the senders fails every call still waiting
            reader_pending.lock().clear();
        });

        Ok(Arc::new(Self {
            outbound,
            pending,
            closed,
        }))
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

/// Client side of the TCP transport: resolves `remote_id` through the static
/// peer table and keeps one connection per peer.
pub struct TcpTransport {
    peers: BTreeMap<NodeId, String>,
    rpc_timeout: Duration,
    connect_timeout: Duration,
    max_frame_bytes: usize,
    connections: Mutex<HashMap<String, Arc<PeerConnection>>>,
    next_opaque: AtomicU64,
}

impl TcpTransport {
    pub fn new(
        peers: BTreeMap<NodeId, String>,
        network: &NetworkConfig,
    ) -> Self {
        Self {
            peers,
            rpc_timeout: network.rpc_timeout(),
            connect_timeout: network.connect_timeout(),
            max_frame_bytes: network.max_frame_bytes,
            connections: Mutex::new(HashMap::new()),
            next_opaque: AtomicU64::new(1),
        }
    }

    async fn connection(
        &self,
        addr: &str,
    ) -> Result<Arc<PeerConnection>> {
        if let Some(conn) = self.connections.lock().get(addr) {
            if conn.is_open() {
                return Ok(conn.clone());
            }
        }

        let conn = PeerConnection::connect(addr, self.connect_timeout, self.max_frame_bytes).await?;

        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(addr) {
            if existing.is_open() {
                conn.closed.cancel();
                return Ok(existing.clone());
            }
        }
        connections.insert(addr.to_string(), conn.clone());
        Ok(conn)
    }

    /// Closes every connection; pending calls fail.
    pub fn close(&self) {
        for (_, conn) in self.connections.lock().drain() {
            conn.closed.cancel();
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl FrameChannel for TcpTransport {
    async fn invoke(
        &self,
        remote_id: &str,
        mut request: RemotingCommand,
    ) -> Result<RemotingCommand> {
        let addr = self
            .peers
            .get(remote_id)
            .ok_or_else(|| NetworkError::UnknownPeer(remote_id.to_string()))?;
        let conn = self.connection(addr).await?;

        let opaque = self.next_opaque.fetch_add(1, Ordering::Relaxed);
        request.opaque = opaque;
        let (tx, rx) = oneshot::channel();
        conn.pending.lock().insert(opaque, tx);

        if conn.outbound.send(request).is_err() || !conn.is_open() {
            conn.pending.lock().remove(&opaque);
            return Err(NetworkError::ConnectionClosed(addr.clone()).into());
        }

        match timeout(self.rpc_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(NetworkError::ConnectionClosed(addr.clone()).into()),
            Err(_) => {
                conn.pending.lock().remove(&opaque);
                Err(NetworkError::Timeout {
                    node_id: remote_id.to_string(),
                    duration: self.rpc_timeout,
                }
                .into())
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn heart_beat(
        &self,
        request: HeartBeatRequest,
    ) -> HeartBeatResponse {
        call(self, request).await
    }

    async fn vote(
        &self,
        request: VoteRequest,
    ) -> VoteResponse {
        call(self, request).await
    }

    async fn append(
        &self,
        request: AppendEntryRequest,
    ) -> AppendEntryResponse {
        call(self, request).await
    }

    async fn get(
        &self,
        request: GetEntriesRequest,
    ) -> GetEntriesResponse {
        call(self, request).await
    }

    async fn metadata(
        &self,
        request: MetadataRequest,
    ) -> MetadataResponse {
        call(self, request).await
    }

    async fn pull(
        &self,
        request: PullEntriesRequest,
    ) -> PullEntriesResponse {
        call(self, request).await
    }

    async fn push(
        &self,
        request: PushEntryRequest,
    ) -> PushEntryResponse {
        call(self, request).await
    }
}

/// Server side of the TCP transport.
pub struct RpcServer;

impl RpcServer {
    /// Binds `addr` and serves frames until `token` is cancelled. Returns the
    /// bound address and the accept loop's handle.
    pub async fn bind(
        addr: &str,
        service: Arc<RpcService>,
        max_frame_bytes: usize,
        token: CancellationToken,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await.map_err(NetworkError::Io)?;
        let local_addr = listener.local_addr().map_err(NetworkError::Io)?;
        info!("rpc server listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("accepted connection from {}", peer);
                            tokio::spawn(serve_connection(
                                stream,
                                service.clone(),
                                max_frame_bytes,
                                token.child_token(),
                            ));
                        }
                        Err(e) => warn!("accept failed: {}", e),
                    },
                }
            }
            info!("rpc server on {} stopped", local_addr);
        });
        Ok((local_addr, handle))
    }
}

async fn serve_connection(
    stream: TcpStream,
    service: Arc<RpcService>,
    max_frame_bytes: usize,
    token: CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<RemotingCommand>();

    let writer_token = token.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_token.cancelled() => break,
                response = rx.recv() => match response {
                    Some(response) => {
                        if let Err(e) = write_frame(&mut writer, &response, max_frame_bytes).await {
                            debug!("write response failed: {}", e);
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = read_frame(&mut reader, max_frame_bytes) => match frame {
                Ok(Some(request)) if !request.response => {
                    let tx = tx.clone();
                    service.spawn_request(request, move |result| {
                        if let Ok(response) = result {
                            let _ = tx.send(response);
                        }
                    });
                }
                Ok(Some(_)) => warn!("ignoring response frame on server connection"),
                Ok(None) => break,
                Err(e) => {
                    debug!("read request failed: {}", e);
                    break;
                }
            },
        }
    }

    token.cancel();
    drop(tx);
    let _ = writer_task.await;
}
