use crate::error::Result;
use crate::net::Descriptor;
use crate::reactor::event_loop::Handler;
use crate::reactor::{
    Channel, ChannelKind, CloseCallback, CloseReason, Completion, ConnectionId, DataCallback,
    Multiplexer, Outcome,
};
use crate::reactor::poller::platform::RawFd;
use crate::utils::{Slab, Token};

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, error, info, warn};

/// Live set of channels owned by the server.
///
/// The registry is the only owner of channels: they live in a generational
/// arena, and the multiplexer and workers only ever see tokens or borrowed
/// descriptors. It is mutated on the loop thread alone, always together
/// with the multiplexer, so a descriptor is in `connections` exactly when
/// its channel is registered.
pub(crate) struct Registry {
    channels: Slab<Channel>,

    /// Connection descriptors and their channel tokens.
    connections: HashMap<RawFd, Token>,

    /// Token of the listening socket's accept channel.
    listener: Token,

    next_id: u64,

    on_data: DataCallback,
    on_close: CloseCallback,

    /// Number of live connections, readable from other threads.
    live: Arc<AtomicUsize>,
}

impl Registry {
    /// Wraps the listening socket in an accept channel and registers it.
    pub(crate) fn new(
        listener: Descriptor,
        multiplexer: &mut Multiplexer,
        on_data: DataCallback,
        on_close: CloseCallback,
    ) -> Result<Self> {
        let mut channels = Slab::with_capacity(64);
        let token = channels.insert(Channel::accept(listener));

        if let Some(channel) = channels.get_mut(token) {
            multiplexer.register(channel, token)?;
        }

        Ok(Self {
            channels,
            connections: HashMap::new(),
            listener: token,
            next_id: 1,
            on_data,
            on_close,
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub(crate) fn live(&self) -> Arc<AtomicUsize> {
        self.live.clone()
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Registers a freshly accepted peer.
    ///
    /// On registration failure the channel is dropped, which closes the
    /// descriptor; nothing is left in the map.
    pub(crate) fn handle_new_connection(
        &mut self,
        descriptor: Descriptor,
        peer: SocketAddrV4,
        multiplexer: &mut Multiplexer,
    ) -> Result<ConnectionId> {
        let fd = descriptor.as_raw_fd();
        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        info!(%peer, fd, %id, "new connection");

        let token = self
            .channels
            .insert(Channel::connection(descriptor, id, self.on_data.clone()));

        if let Some(channel) = self.channels.get_mut(token) {
            if let Err(e) = multiplexer.register(channel, token) {
                self.channels.remove(token);
                return Err(e);
            }
        }

        self.connections.insert(fd, token);
        self.live.fetch_add(1, Ordering::AcqRel);

        Ok(id)
    }

    /// Tears a connection down.
    ///
    /// Unknown descriptors are ignored, so a repeated notification for the
    /// same connection is harmless. The channel is deregistered and
    /// dropped (closing the descriptor) before `on_close` runs.
    pub(crate) fn handle_client_disconnect(
        &mut self,
        fd: RawFd,
        reason: CloseReason,
        multiplexer: &mut Multiplexer,
    ) {
        let Some(token) = self.connections.remove(&fd) else {
            return;
        };
        let Some(mut channel) = self.channels.remove(token) else {
            return;
        };

        if let Err(e) = multiplexer.deregister(&mut channel) {
            warn!(fd, error = %e, "deregister failed during teardown");
        }
        debug_assert!(!multiplexer.is_registered(fd));

        let ChannelKind::Connection(id) = channel.kind() else {
            return;
        };
        drop(channel);

        self.live.fetch_sub(1, Ordering::AcqRel);

        match reason {
            CloseReason::Peer => info!(fd, %id, "client disconnected"),
            CloseReason::Io(e) => warn!(fd, %id, error = %e, "connection closed after read error"),
            CloseReason::TaskFailure => error!(fd, %id, "connection closed after task failure"),
            CloseReason::Shutdown => debug!(fd, %id, "connection closed at shutdown"),
        }

        (self.on_close)(id);
    }

    /// Tears down every remaining connection.
    ///
    /// Runs once the loop has stopped and the workers are drained.
    pub(crate) fn close_all(&mut self, multiplexer: &mut Multiplexer) {
        let fds: Vec<RawFd> = self.connections.keys().copied().collect();
        debug!(
            count = fds.len(),
            channels = self.channels.len(),
            registered = multiplexer.len(),
            "closing remaining connections"
        );

        for fd in fds {
            self.handle_client_disconnect(fd, CloseReason::Shutdown, multiplexer);
        }

        if let Some(mut listener) = self.channels.remove(self.listener) {
            let _ = multiplexer.deregister(&mut listener);
        }
    }
}

impl Handler for Registry {
    fn channels(&mut self) -> &mut Slab<Channel> {
        &mut self.channels
    }

    fn complete(&mut self, completion: Completion, multiplexer: &mut Multiplexer) -> Option<Token> {
        match completion {
            Completion::Finished {
                token,
                work,
                outcome,
            } => {
                let channel = self.channels.get_mut(token)?;
                let fd = channel.fd();

                match outcome {
                    Outcome::Drained => channel.finish(work).then_some(token),
                    Outcome::Closed(reason) => {
                        drop(work);
                        self.handle_client_disconnect(fd, reason, multiplexer);
                        None
                    }
                    Outcome::Accepted(peers) => {
                        let again = channel.finish(work);

                        for (descriptor, peer) in peers {
                            if let Err(e) = self.handle_new_connection(descriptor, peer, multiplexer)
                            {
                                error!(%peer, error = %e, "failed to register connection");
                            }
                        }

                        again.then_some(token)
                    }
                }
            }

            Completion::Failed { token } => {
                let channel = self.channels.get_mut(token)?;

                match channel.kind() {
                    ChannelKind::Accept => channel.restore_accept().then_some(token),
                    ChannelKind::Connection(_) => {
                        let fd = channel.fd();
                        self.handle_client_disconnect(fd, CloseReason::TaskFailure, multiplexer);
                        None
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::net::{accept_fd, create_listening_socket};

    use std::fs::File;
    use std::net::{Ipv4Addr, TcpStream};
    use std::os::fd::IntoRawFd;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    struct Fixture {
        registry: Registry,
        multiplexer: Multiplexer,
        closes: Arc<Mutex<Vec<ConnectionId>>>,
        addr: SocketAddrV4,
    }

    fn fixture() -> Fixture {
        let listener =
            create_listening_socket(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), true).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut multiplexer = Multiplexer::new(16).unwrap();
        let closes = Arc::new(Mutex::new(Vec::new()));
        let sink = closes.clone();

        let registry = Registry::new(
            listener,
            &mut multiplexer,
            Arc::new(|_: ConnectionId, _: &[u8]| {}),
            Arc::new(move |id: ConnectionId| sink.lock().unwrap().push(id)),
        )
        .unwrap();

        Fixture {
            registry,
            multiplexer,
            closes,
            addr,
        }
    }

    impl Fixture {
        /// Connects a client and registers the accepted peer.
        fn connect(&mut self) -> (TcpStream, RawFd, ConnectionId) {
            let client = TcpStream::connect(self.addr).unwrap();
            let listener_fd = self.registry.channels.get(self.registry.listener).unwrap().fd();

            for _ in 0..100 {
                match accept_fd(listener_fd) {
                    Ok((descriptor, peer)) => {
                        let fd = descriptor.as_raw_fd();
                        let id = self
                            .registry
                            .handle_new_connection(descriptor, peer, &mut self.multiplexer)
                            .unwrap();
                        return (client, fd, id);
                    }
                    Err(e) if e.is_would_block() => thread::sleep(Duration::from_millis(5)),
                    Err(e) => panic!("accept failed: {e}"),
                }
            }

            panic!("connection was never accepted");
        }

        fn token_of(&self, fd: RawFd) -> Token {
            self.registry.connections[&fd]
        }

        fn closes(&self) -> Vec<ConnectionId> {
            self.closes.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_repeated_disconnect_tears_down_once() {
        let mut f = fixture();
        let (_client, fd, id) = f.connect();

        assert_eq!(f.registry.connection_count(), 1);
        assert!(f.multiplexer.is_registered(fd));

        f.registry
            .handle_client_disconnect(fd, CloseReason::Peer, &mut f.multiplexer);
        f.registry
            .handle_client_disconnect(fd, CloseReason::Peer, &mut f.multiplexer);

        assert_eq!(f.closes(), vec![id]);
        assert_eq!(f.registry.connection_count(), 0);
        assert_eq!(f.registry.live().load(Ordering::Acquire), 0);
        assert!(!f.multiplexer.is_registered(fd));
    }

    #[test]
    fn test_failed_registration_leaves_nothing_behind() {
        let mut f = fixture();

        // Regular files cannot be watched by epoll.
        let file = File::open(std::env::current_exe().unwrap()).unwrap();
        let descriptor = unsafe { Descriptor::from_raw(file.into_raw_fd()) };
        let peer = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1);

        let err = f
            .registry
            .handle_new_connection(descriptor, peer, &mut f.multiplexer)
            .unwrap_err();

        assert!(matches!(err, Error::Resource { op: "epoll_ctl(ADD)", .. }));
        assert_eq!(f.registry.connection_count(), 0);
        assert_eq!(f.registry.live().load(Ordering::Acquire), 0);
        assert_eq!(f.registry.channels.len(), 1, "only the accept channel remains");
        assert_eq!(f.multiplexer.len(), 1);
    }

    #[test]
    fn test_readiness_during_flight_is_replayed() {
        let mut f = fixture();
        let (_client, fd, _) = f.connect();
        let token = f.token_of(fd);

        let channel = f.registry.channels.get_mut(token).unwrap();
        let (_, work) = channel.begin().unwrap();
        assert!(channel.begin().is_none());

        let completion = Completion::Finished {
            token,
            work,
            outcome: Outcome::Drained,
        };
        assert_eq!(f.registry.complete(completion, &mut f.multiplexer), Some(token));

        let (_, work) = f.registry.channels.get_mut(token).unwrap().begin().unwrap();
        let completion = Completion::Finished {
            token,
            work,
            outcome: Outcome::Drained,
        };
        assert_eq!(f.registry.complete(completion, &mut f.multiplexer), None);
        assert_eq!(f.registry.connection_count(), 1);
    }

    #[test]
    fn test_closed_outcome_tears_connection_down() {
        let mut f = fixture();
        let (_client, fd, id) = f.connect();
        let token = f.token_of(fd);

        let (_, work) = f.registry.channels.get_mut(token).unwrap().begin().unwrap();
        let completion = Completion::Finished {
            token,
            work,
            outcome: Outcome::Closed(CloseReason::Peer),
        };

        assert_eq!(f.registry.complete(completion, &mut f.multiplexer), None);
        assert_eq!(f.closes(), vec![id]);
        assert!(f.registry.channels.get(token).is_none());
    }

    #[test]
    fn test_failed_accept_work_is_restored() {
        let mut f = fixture();
        let listener = f.registry.listener;

        let (_, lost) = f.registry.channels.get_mut(listener).unwrap().begin().unwrap();
        drop(lost);

        let again = f
            .registry
            .complete(Completion::Failed { token: listener }, &mut f.multiplexer);
        assert_eq!(again, None);

        let channel = f.registry.channels.get_mut(listener).unwrap();
        assert_eq!(channel.kind(), ChannelKind::Accept);
        assert!(channel.begin().is_some(), "accept work must be reinstalled");
        assert!(f.closes().is_empty());
    }

    #[test]
    fn test_failed_connection_work_closes_that_connection() {
        let mut f = fixture();
        let (_a, fd_a, id_a) = f.connect();
        let (_b, fd_b, _) = f.connect();
        let token = f.token_of(fd_a);

        let (_, lost) = f.registry.channels.get_mut(token).unwrap().begin().unwrap();
        drop(lost);

        let again = f
            .registry
            .complete(Completion::Failed { token }, &mut f.multiplexer);

        assert_eq!(again, None);
        assert_eq!(f.closes(), vec![id_a]);
        assert_eq!(f.registry.connection_count(), 1);
        assert!(!f.multiplexer.is_registered(fd_a));
        assert!(f.multiplexer.is_registered(fd_b));
    }

    #[test]
    fn test_close_all_reports_every_connection() {
        let mut f = fixture();
        let (_a, _, id_a) = f.connect();
        let (_b, _, id_b) = f.connect();

        f.registry.close_all(&mut f.multiplexer);

        let mut closes = f.closes();
        closes.sort();
        assert_eq!(closes, vec![id_a, id_b]);
        assert_eq!(f.registry.connection_count(), 0);
        assert_eq!(f.registry.channels.len(), 0);
        assert_eq!(f.multiplexer.len(), 0);
    }
}
