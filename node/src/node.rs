use chordring_lib::{is_between, Message, MessageType, NodeInfo, Position};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::error::{JoinStep, NodeError, TransportError};
use crate::network_client::NetworkClient;
use crate::transport;

macro_rules! log_info {
    ($address:expr, $($arg:tt)*) => ({
        info!("[{}] {}", $address, format_args!($($arg)*));
    })
}

macro_rules! log_warn {
    ($address:expr, $($arg:tt)*) => ({
        warn!("[{}] {}", $address, format_args!($($arg)*));
    })
}

macro_rules! log_error {
    ($address:expr, $($arg:tt)*) => ({
        error!("[{}] {}", $address, format_args!($($arg)*));
    })
}

/// Bound on a single lookup hop, including every hop behind it.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_millis(500);
/// Bound on each join/leave handshake message.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(2);
/// How much less time a forwarded lookup gets than the hop that forwarded
/// it, so a failure further down is reported before the caller gives up.
pub const HOP_MARGIN: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub lookup: Duration,
    pub control: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            lookup: LOOKUP_TIMEOUT,
            control: CONTROL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unstarted,
    Running,
    Stopped,
}

#[derive(Debug, Default, Clone, Copy)]
struct JoinTiming {
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

#[derive(Debug)]
pub struct ChordNode<T: NetworkClient> {
    pub info: NodeInfo,
    successor: Arc<Mutex<Option<NodeInfo>>>,
    predecessor: Arc<Mutex<Option<NodeInfo>>>,
    bootstrap_peer: Arc<Mutex<Option<String>>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    join_timing: Arc<Mutex<JoinTiming>>,
    shutdown: Arc<Notify>,
    network_client: Arc<T>,
    timeouts: Timeouts,
}

impl<T: NetworkClient> Clone for ChordNode<T> {
    fn clone(&self) -> Self {
        ChordNode {
            info: self.info.clone(),
            successor: self.successor.clone(),
            predecessor: self.predecessor.clone(),
            bootstrap_peer: self.bootstrap_peer.clone(),
            lifecycle: self.lifecycle.clone(),
            join_timing: self.join_timing.clone(),
            shutdown: self.shutdown.clone(),
            network_client: self.network_client.clone(),
            timeouts: self.timeouts,
        }
    }
}

// A poisoned pointer is still a valid pointer; keep serving with it.
fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn join_failed(bootstrap: &str, step: JoinStep) -> impl FnOnce(TransportError) -> NodeError + '_ {
    move |source| NodeError::JoinFailed {
        bootstrap: bootstrap.to_string(),
        step,
        source,
    }
}

// Checks that a reply answers the request type it was sent for.
fn expect_reply(
    reply: Message,
    kind: MessageType,
    address: &str,
) -> Result<Message, TransportError> {
    if reply.kind != kind {
        return Err(TransportError::protocol(
            address,
            format!("expected a {:?} reply, got {:?}", kind, reply.kind),
        ));
    }
    Ok(reply)
}

fn owner_of(reply: Message, address: &str) -> Result<NodeInfo, TransportError> {
    let reply = expect_reply(reply, MessageType::Lookup, address)?;
    match (reply.result, reply.failure) {
        (Some(owner), _) => Ok(owner),
        (None, Some(failure)) => Err(TransportError::Unresolved {
            address: failure.address,
            cause: failure.cause,
        }),
        (None, None) => Err(TransportError::protocol(
            address,
            "lookup reply carried no owner",
        )),
    }
}

impl<T: NetworkClient> ChordNode<T> {
    /// Creates a node whose ring position is the hash of its address.
    pub fn new(address: impl Into<String>, network_client: Arc<T>) -> Self {
        Self::with_info(NodeInfo::from_address(address), network_client)
    }

    /// Creates a node at an explicitly chosen ring position.
    pub fn new_with_id(id: Position, address: impl Into<String>, network_client: Arc<T>) -> Self {
        Self::with_info(NodeInfo::new(id, address), network_client)
    }

    fn with_info(info: NodeInfo, network_client: Arc<T>) -> Self {
        ChordNode {
            info,
            successor: Arc::new(Mutex::new(None)),
            predecessor: Arc::new(Mutex::new(None)),
            bootstrap_peer: Arc::new(Mutex::new(None)),
            lifecycle: Arc::new(Mutex::new(Lifecycle::Unstarted)),
            join_timing: Arc::new(Mutex::new(JoinTiming::default())),
            shutdown: Arc::new(Notify::new()),
            network_client,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *lock(&self.lifecycle)
    }

    pub fn get_successor(&self) -> Option<NodeInfo> {
        lock(&self.successor).clone()
    }

    pub fn get_predecessor(&self) -> Option<NodeInfo> {
        lock(&self.predecessor).clone()
    }

    pub fn bootstrap_peer(&self) -> Option<String> {
        lock(&self.bootstrap_peer).clone()
    }

    /// Time between the start and the end of a successful join.
    pub fn join_duration(&self) -> Option<Duration> {
        let timing = *lock(&self.join_timing);
        match (timing.started_at, timing.finished_at) {
            (Some(started), Some(finished)) => Some(finished.duration_since(started)),
            _ => None,
        }
    }

    // Snapshot of (predecessor, successor), or None while either is unset.
    fn ring_pointers(&self) -> Option<(NodeInfo, NodeInfo)> {
        let predecessor = self.get_predecessor()?;
        let successor = self.get_successor()?;
        Some((predecessor, successor))
    }

    fn is_self(&self, node: &NodeInfo) -> bool {
        node.address == self.info.address
    }

    /// Becomes the sole member of a new ring.
    pub fn create_group(&self) {
        *lock(&self.predecessor) = Some(self.info.clone());
        *lock(&self.successor) = Some(self.info.clone());
        *lock(&self.bootstrap_peer) = None;
        *lock(&self.lifecycle) = Lifecycle::Running;
        log_info!(self.info.address, "Started new ring. I am the only node.");
    }

    /// Remembers `known_peer` so that [`ChordNode::run`] joins through it.
    pub fn join_group(&self, known_peer: impl Into<String>) {
        *lock(&self.bootstrap_peer) = Some(known_peer.into());
    }

    /// Runs the four-message join handshake through `bootstrap`.
    ///
    /// Local pointers are only written once every step has succeeded, so a
    /// failed join leaves the node unstarted with no pointers set. Remote
    /// pointers changed before the failing step are not rolled back.
    pub async fn join(&self, bootstrap: &str) -> Result<(), NodeError> {
        if self.lifecycle() != Lifecycle::Unstarted {
            return Err(NodeError::AlreadyJoined);
        }

        let started_at = Instant::now();
        *lock(&self.join_timing) = JoinTiming {
            started_at: Some(started_at),
            finished_at: None,
        };
        log_info!(
            self.info.address,
            "Attempting to join ring via bootstrap node: {}",
            bootstrap
        );

        // The bootstrap peer is the origin so the lookup stops once it wraps.
        let reply = self
            .call_control(
                bootstrap,
                Message::lookup(self.info.id, bootstrap).with_budget(self.timeouts.control),
            )
            .await
            .map_err(join_failed(bootstrap, JoinStep::FindSuccessor))?;
        let successor =
            owner_of(reply, bootstrap).map_err(join_failed(bootstrap, JoinStep::FindSuccessor))?;
        debug!(
            "[{}] Join: successor will be {}",
            self.info.address, successor.address
        );

        let predecessor = self
            .call_control(&successor.address, Message::get_predecessor())
            .await
            .and_then(|reply| {
                reply.result.ok_or_else(|| {
                    TransportError::protocol(&successor.address, "successor has no predecessor")
                })
            })
            .map_err(join_failed(bootstrap, JoinStep::GetPredecessor))?;
        debug!(
            "[{}] Join: predecessor will be {}",
            self.info.address, predecessor.address
        );

        self.call_control(
            &successor.address,
            Message::set_predecessor(self.info.clone()),
        )
        .await
        .map_err(join_failed(bootstrap, JoinStep::SetPredecessor))?;

        self.call_control(
            &predecessor.address,
            Message::set_successor(self.info.clone()),
        )
        .await
        .map_err(join_failed(bootstrap, JoinStep::SetSuccessor))?;

        *lock(&self.successor) = Some(successor.clone());
        *lock(&self.predecessor) = Some(predecessor.clone());
        *lock(&self.bootstrap_peer) = None;
        *lock(&self.lifecycle) = Lifecycle::Running;
        lock(&self.join_timing).finished_at = Some(Instant::now());

        log_info!(
            self.info.address,
            "Joined ring in {:?}. Successor: {} Predecessor: {}",
            started_at.elapsed(),
            successor.address,
            predecessor.address
        );
        Ok(())
    }

    /// Resolves the node responsible for `key`, starting from this node.
    pub async fn find_owner(&self, key: Position) -> Result<NodeInfo, NodeError> {
        self.lookup(key, &self.info.address).await
    }

    /// Resolves the owner of `key` for a lookup chain started by `origin`.
    ///
    /// Routing walks successor pointers one hop at a time. The chain stops
    /// either when the key falls between this node and its successor, or
    /// when the successor is the origin, which means the walk has wrapped.
    pub async fn lookup(&self, key: Position, origin: &str) -> Result<NodeInfo, NodeError> {
        self.lookup_within(key, origin, self.timeouts.lookup).await
    }

    // `budget` bounds the forwarded hop together with every hop behind it.
    async fn lookup_within(
        &self,
        key: Position,
        origin: &str,
        budget: Duration,
    ) -> Result<NodeInfo, NodeError> {
        let (predecessor, successor) = self.ring_pointers().ok_or(NodeError::NotInRing)?;

        if self.is_self(&predecessor) {
            return Ok(self.info.clone());
        }

        if successor.address == origin {
            return Ok(successor);
        }

        if is_between(key, self.info.id, successor.id) {
            return Ok(successor);
        }

        debug!(
            "[{}] Lookup: forwarding key {} to {} (origin {})",
            self.info.address, key, successor.address, origin
        );
        let owner = self
            .network_client
            .call_node(
                &successor.address,
                Message::lookup(key, origin).with_budget(budget),
                budget,
            )
            .await
            .and_then(|reply| owner_of(reply, &successor.address))
            .map_err(|source| NodeError::Lookup { key, source })?;
        Ok(owner)
    }

    /// Hands this node's range to its neighbours and stops serving.
    ///
    /// The node stops even when a notification fails; the first failure is
    /// returned so the caller knows the ring may be torn.
    pub async fn leave(&self) -> Result<(), NodeError> {
        if self.lifecycle() != Lifecycle::Running {
            return Err(NodeError::NotRunning);
        }
        let (predecessor, successor) = self.ring_pointers().ok_or(NodeError::NotInRing)?;
        log_info!(self.info.address, "Started the leaving process");

        let mut outcome = Ok(());
        if !self.is_self(&successor) {
            if let Err(source) = self
                .call_control(
                    &successor.address,
                    Message::set_predecessor(predecessor.clone()),
                )
                .await
            {
                outcome = Err(NodeError::LeaveFailed {
                    peer: successor.address.clone(),
                    source,
                });
            } else if let Err(source) = self
                .call_control(
                    &predecessor.address,
                    Message::set_successor(successor.clone()),
                )
                .await
            {
                outcome = Err(NodeError::LeaveFailed {
                    peer: predecessor.address.clone(),
                    source,
                });
            }
        }

        self.stop();
        match &outcome {
            Ok(()) => log_info!(self.info.address, "Left the ring"),
            Err(e) => log_warn!(self.info.address, "Left the ring uncleanly: {}", e),
        }
        outcome
    }

    fn stop(&self) {
        *lock(&self.lifecycle) = Lifecycle::Stopped;
        self.shutdown.notify_one();
    }

    async fn call_control(
        &self,
        address: &str,
        message: Message,
    ) -> Result<Message, TransportError> {
        let kind = message.kind;
        let reply = self
            .network_client
            .call_node(address, message, self.timeouts.control)
            .await?;
        expect_reply(reply, kind, address)
    }

    /// Answers one inbound request. This is the only dispatch path, shared
    /// by the TCP accept loop and any in-memory network.
    pub async fn handle_message(&self, message: Message) -> Result<Message, NodeError> {
        if self.lifecycle() == Lifecycle::Stopped {
            return Err(NodeError::Stopped);
        }

        match message.kind {
            MessageType::Lookup => {
                let origin = message
                    .origin
                    .ok_or_else(|| NodeError::Protocol("lookup without origin".to_string()))?;
                let budget = message
                    .budget
                    .unwrap_or(self.timeouts.lookup)
                    .saturating_sub(HOP_MARGIN);
                match self.lookup_within(message.key, &origin, budget).await {
                    Ok(owner) => Ok(Message::lookup_reply(message.key, owner)),
                    // Relay the broken hop so the origin learns the real cause
                    Err(NodeError::Lookup { key, source }) => {
                        log_warn!(self.info.address, "Lookup of key {} failed: {}", key, source);
                        Ok(Message::lookup_failed(key, source.hop_failure()))
                    }
                    Err(e) => Err(e),
                }
            }
            MessageType::GetPredecessor => Ok(Message::predecessor_reply(self.get_predecessor())),
            MessageType::SetPredecessor => {
                let node = message.result.ok_or_else(|| {
                    NodeError::Protocol("set predecessor without a node".to_string())
                })?;
                log_info!(self.info.address, "Predecessor is now {}", node.address);
                *lock(&self.predecessor) = Some(node);
                Ok(Message::ack(MessageType::SetPredecessor))
            }
            MessageType::SetSuccessor => {
                let node = message.result.ok_or_else(|| {
                    NodeError::Protocol("set successor without a node".to_string())
                })?;
                log_info!(self.info.address, "Successor is now {}", node.address);
                *lock(&self.successor) = Some(node);
                Ok(Message::ack(MessageType::SetSuccessor))
            }
        }
    }

    pub async fn bind(&self) -> Result<TcpListener, NodeError> {
        TcpListener::bind(&self.info.address)
            .await
            .map_err(|source| NodeError::Bind {
                address: self.info.address.clone(),
                source,
            })
    }

    /// Binds the node's own address and runs it.
    pub async fn start(&self) -> Result<(), NodeError> {
        let listener = self.bind().await?;
        self.run(listener).await
    }

    /// Joins through the configured bootstrap peer if there is one, then
    /// serves until the node leaves.
    pub async fn run(&self, listener: TcpListener) -> Result<(), NodeError> {
        if let Some(bootstrap) = self.bootstrap_peer() {
            if self.lifecycle() == Lifecycle::Unstarted {
                self.join(&bootstrap).await?;
            }
        }
        if self.lifecycle() != Lifecycle::Running {
            return Err(NodeError::NotInRing);
        }

        log_info!(self.info.address, "Serving as {}", self);
        self.serve(listener).await;
        Ok(())
    }

    /// Accept loop. Connections are handled strictly one at a time, so ring
    /// pointers only ever change between two requests.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, _)) => self.handle_connection(socket).await,
                    Err(e) => {
                        log_error!(self.info.address, "Failed to accept connection: {}", e);
                    }
                },
            }
        }
        drop(listener);
        *lock(&self.lifecycle) = Lifecycle::Stopped;
        log_info!(self.info.address, "Listening socket closed");
    }

    // Reading the request and writing the reply are each bounded by the
    // control timeout; an idle peer must not stall the accept loop.
    async fn handle_connection(&self, mut socket: TcpStream) {
        let peer = transport::peer_label(&socket);
        let limit = self.timeouts.control;
        let timed_out = |peer: &str| TransportError::Timeout {
            address: peer.to_string(),
            after: limit,
        };

        let request = match timeout(limit, transport::read_request(&mut socket))
            .await
            .unwrap_or_else(|_| Err(timed_out(&peer)))
        {
            Ok(request) => request,
            Err(e) => {
                log_error!(self.info.address, "Rejected connection from {}: {}", peer, e);
                return;
            }
        };

        match self.handle_message(request).await {
            Ok(reply) => {
                let written = timeout(limit, transport::write_reply(&mut socket, &reply))
                    .await
                    .unwrap_or_else(|_| Err(timed_out(&peer)));
                if let Err(e) = written {
                    log_error!(self.info.address, "Failed to write reply to {}: {}", peer, e);
                }
            }
            Err(e) => {
                log_error!(self.info.address, "Failed to handle request from {}: {}", peer, e);
            }
        }
    }

    /// DOT edges from this node to its successor and predecessor, by position.
    pub fn graphviz(&self) -> String {
        let mut edges = String::new();
        if let Some(successor) = self.get_successor() {
            edges.push_str(&format!("{} -> {}\n", self.info.id, successor.id));
        }
        if let Some(predecessor) = self.get_predecessor() {
            edges.push_str(&format!("{} -> {}\n", self.info.id, predecessor.id));
        }
        edges
    }
}

impl<T: NetworkClient> fmt::Display for ChordNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address_of = |node: Option<NodeInfo>| {
            node.map(|n| n.address)
                .unwrap_or_else(|| "None".to_string())
        };
        write!(
            f,
            "ID: {} :: KEY: {} :: SUCC: {} :: PRED: {}",
            self.info.address,
            self.info.id,
            address_of(self.get_successor()),
            address_of(self.get_predecessor())
        )
    }
}
