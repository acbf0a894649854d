//! Per-controller connections over a shared reply port.
//!
//! Amplifiers answer on one fixed local port, so every controller served by a
//! [`ConnectionCache`] shares a single reply socket per address family. A
//! reader task owns the receive side and routes each datagram to the
//! controller registered for the sender's address.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::codec::{Request, Response};
use super::error::AmpError;
use super::sequence::SequenceCounter;
use super::AmpConfig;

type Routes = DashMap<SocketAddr, mpsc::UnboundedSender<Bytes>>;

#[derive(Debug)]
struct BoundSocket {
    socket: Arc<UdpSocket>,
    reader: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Sockets {
    v4: Option<BoundSocket>,
    v6: Option<BoundSocket>,
}

impl Sockets {
    fn slot(&mut self, remote: SocketAddr) -> &mut Option<BoundSocket> {
        if remote.is_ipv4() {
            &mut self.v4
        } else {
            &mut self.v6
        }
    }

    fn close(&mut self) {
        for bound in [self.v4.take(), self.v6.take()].into_iter().flatten() {
            bound.reader.abort();
        }
    }
}

/// Reply socket shared by every controller of one cache.
#[derive(Debug)]
pub struct ReplyPort {
    local_port: u16,
    max_datagram: usize,
    routes: Arc<Routes>,
    sockets: Mutex<Sockets>,
}

impl ReplyPort {
    pub fn new(local_port: u16, max_datagram: usize) -> Self {
        Self {
            local_port,
            max_datagram,
            routes: Arc::new(DashMap::new()),
            sockets: Mutex::new(Sockets::default()),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Whether a socket is bound for `remote`'s address family.
    pub async fn is_bound(&self, remote: SocketAddr) -> bool {
        self.sockets.lock().await.slot(remote).is_some()
    }

    /// Socket for `remote`'s address family, bound on first use.
    ///
    /// A socket whose reader stopped is rebound.
    async fn socket(&self, remote: SocketAddr) -> std::io::Result<Arc<UdpSocket>> {
        let mut sockets = self.sockets.lock().await;
        let slot = sockets.slot(remote);
        if let Some(bound) = slot.as_ref() {
            if !bound.reader.is_finished() {
                return Ok(bound.socket.clone());
            }
            warn!(local_port = self.local_port, "Reply reader stopped, rebinding");
        }

        let socket = Arc::new(bind_socket(self.local_port, remote)?);
        let reader = tokio::spawn(read_replies(
            socket.clone(),
            self.routes.clone(),
            self.max_datagram,
        ));
        if let Some(stale) = slot.replace(BoundSocket {
            socket: socket.clone(),
            reader,
        }) {
            stale.reader.abort();
        }
        Ok(socket)
    }

    fn register(&self, remote: SocketAddr, sender: &mpsc::UnboundedSender<Bytes>) {
        let current = self
            .routes
            .get(&remote)
            .is_some_and(|route| route.same_channel(sender));
        if !current {
            self.routes.insert(remote, sender.clone());
        }
    }

    fn unregister(&self, remote: SocketAddr, sender: &mpsc::UnboundedSender<Bytes>) {
        self.routes
            .remove_if(&remote, |_, route| route.same_channel(sender));
    }

    /// Stop the readers and release the sockets.
    pub async fn close(&self) {
        self.sockets.lock().await.close();
    }
}

impl Drop for ReplyPort {
    fn drop(&mut self) {
        self.sockets.get_mut().close();
    }
}

/// Route one datagram to the controller at its source address.
///
/// Devices may answer from a port other than the one they listen on, so an
/// exact address match falls back to the first controller on the same host.
fn route(routes: &Routes, from: SocketAddr, datagram: Bytes) -> bool {
    let sender = routes.get(&from).map(|route| route.value().clone()).or_else(|| {
        routes
            .iter()
            .find(|route| route.key().ip() == from.ip())
            .map(|route| route.value().clone())
    });
    sender.is_some_and(|sender| sender.send(datagram).is_ok())
}

async fn read_replies(socket: Arc<UdpSocket>, routes: Arc<Routes>, max_datagram: usize) {
    let mut buf = vec![0u8; max_datagram];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "Reply socket failed");
                return;
            }
        };
        if !route(&routes, from, Bytes::copy_from_slice(&buf[..len])) {
            debug!(%from, "Ignoring datagram from unknown host");
        }
    }
}

fn bind_socket(local_port: u16, remote: SocketAddr) -> std::io::Result<UdpSocket> {
    let local: SocketAddr = match remote {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, local_port).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, local_port).into(),
    };

    let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&local.into())?;
    UdpSocket::from_std(socket.into())
}

#[derive(Debug)]
struct ReplyRoute {
    sender: mpsc::UnboundedSender<Bytes>,
    replies: mpsc::UnboundedReceiver<Bytes>,
}

impl ReplyRoute {
    fn new() -> Self {
        let (sender, replies) = mpsc::unbounded_channel();
        Self { sender, replies }
    }
}

/// Reply route and sequence counter of one controller.
///
/// Callers hold the connection's mutex for the whole request/response
/// exchange, which is what keeps a single request in flight.
#[derive(Debug)]
pub struct ControllerConnection {
    controller_ref: String,
    remote: SocketAddr,
    port: Arc<ReplyPort>,
    route: Option<ReplyRoute>,
    sequence: SequenceCounter,
}

impl ControllerConnection {
    pub fn new(controller_ref: impl Into<String>, remote: SocketAddr, port: Arc<ReplyPort>) -> Self {
        Self {
            controller_ref: controller_ref.into(),
            remote,
            port,
            route: None,
            sequence: SequenceCounter::new(),
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Last sequence number sent.
    pub fn sequence(&self) -> u16 {
        self.sequence.current()
    }

    pub fn is_open(&self) -> bool {
        self.route.is_some()
    }

    /// Send one request and wait for the reply.
    ///
    /// The route is registered lazily and dropped on any socket error so the
    /// next request starts clean.
    pub async fn transact(
        &mut self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, AmpError> {
        let socket = self.port.socket(self.remote).await.map_err(|e| {
            warn!(
                controller = %self.controller_ref,
                local_port = self.port.local_port(),
                error = %e,
                "Failed to bind reply socket"
            );
            AmpError::Io(e)
        })?;

        let mut route = self.route.take().unwrap_or_else(ReplyRoute::new);
        self.port.register(self.remote, &route.sender);

        let sequence = self.sequence.next();
        let packet = request.encode(sequence);
        debug!(
            controller = %self.controller_ref,
            sequence,
            code = %request.code,
            packet = %hex::encode(&packet),
            "Sending request"
        );

        let result = self
            .exchange(&socket, &mut route.replies, &packet, timeout)
            .await;
        match &result {
            Err(AmpError::Io(e)) => {
                warn!(
                    controller = %self.controller_ref,
                    error = %e,
                    "Socket error, dropping connection"
                );
                self.port.unregister(self.remote, &route.sender);
            }
            _ => self.route = Some(route),
        }
        result
    }

    async fn exchange(
        &self,
        socket: &UdpSocket,
        replies: &mut mpsc::UnboundedReceiver<Bytes>,
        packet: &[u8],
        timeout: Duration,
    ) -> Result<Response, AmpError> {
        // Replies that arrived after an earlier request gave up waiting.
        while let Ok(stale) = replies.try_recv() {
            debug!(
                controller = %self.controller_ref,
                packet = %hex::encode(&stale),
                "Discarding stale datagram"
            );
        }

        socket.send_to(packet, self.remote).await?;

        let datagram = match tokio::time::timeout(timeout, replies.recv()).await {
            Ok(Some(datagram)) => datagram,
            Ok(None) | Err(_) => {
                return Err(AmpError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };

        debug!(
            controller = %self.controller_ref,
            packet = %hex::encode(&datagram),
            "Received response"
        );
        Ok(Response::decode(&datagram)?)
    }

    /// Stop receiving replies for this controller.
    pub fn close(&mut self) {
        if let Some(route) = self.route.take() {
            self.port.unregister(self.remote, &route.sender);
        }
    }
}

#[derive(Debug)]
struct CachedConnection {
    remote: SocketAddr,
    connection: Arc<Mutex<ControllerConnection>>,
}

/// Connection cache keyed by controller reference.
#[derive(Debug)]
pub struct ConnectionCache {
    connections: DashMap<String, CachedConnection>,
    port: Arc<ReplyPort>,
}

impl ConnectionCache {
    pub fn new(config: &AmpConfig) -> Self {
        Self {
            connections: DashMap::new(),
            port: Arc::new(ReplyPort::new(config.local_port, config.max_datagram)),
        }
    }

    pub fn reply_port(&self) -> &Arc<ReplyPort> {
        &self.port
    }

    /// Connection for a controller, replaced if its address changed.
    pub fn connection(
        &self,
        controller_ref: &str,
        remote: SocketAddr,
    ) -> Arc<Mutex<ControllerConnection>> {
        let create = || CachedConnection {
            remote,
            connection: Arc::new(Mutex::new(ControllerConnection::new(
                controller_ref,
                remote,
                self.port.clone(),
            ))),
        };

        let mut entry = self
            .connections
            .entry(controller_ref.to_string())
            .or_insert_with(create);
        if entry.remote != remote {
            debug!(controller = controller_ref, %remote, "Controller address changed");
            *entry = create();
        }
        entry.connection.clone()
    }

    pub fn remove(&self, controller_ref: &str) -> bool {
        self.connections.remove(controller_ref).is_some()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close and forget every connection, then release the reply socket.
    pub async fn close_all(&self) {
        let connections: Vec<_> = self
            .connections
            .iter()
            .map(|entry| entry.connection.clone())
            .collect();
        self.connections.clear();

        for connection in connections {
            connection.lock().await.close();
        }
        self.port.close().await;
    }
}
