//! The discovery manager.
//!
//! Owns the service sets and the callback registry, runs the receive
//! loop, and speaks the REQUEST/OFFER/LEAVING protocol. One manager per
//! process per group is the expected shape.
//!
//! Locking discipline: the three mutexes (registered, discovered,
//! callbacks) are leaf locks. No code path holds two at once, and the
//! discovered-set lock is released before the callback snapshot is
//! taken, so user callbacks can call back into the manager freely.

use std::collections::BTreeSet;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use chirp_core::config::ChirpConfig;
use chirp_core::wire::{Message, MessageType, ServiceIdentifier};
use chirp_core::Md5Hash;

use crate::callback::{CallbackRegistry, DiscoverCallback, UserData};
use crate::registry::{DiscoveredService, RegisteredService, ServiceSet};
use crate::transport::{BroadcastRecv, BroadcastSend};

/// How long a silent `recv` may block before the stop flag is rechecked.
/// Bounds shutdown latency on a quiet network.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Pause after a receive error before retrying, so a persistently failing
/// socket does not spin the loop.
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

// ── Shared state ──────────────────────────────────────────────────────────────

/// State shared between the public API, the receive task, and Drop.
struct Shared {
    group_hash: Md5Hash,
    name_hash: Md5Hash,
    sender: BroadcastSend,
    registered: ServiceSet<RegisteredService>,
    discovered: ServiceSet<DiscoveredService>,
    callbacks: CallbackRegistry,
    stopping: AtomicBool,
}

impl Shared {
    fn send_message(&self, msg_type: MessageType, service: RegisteredService) {
        let message = Message::new(
            msg_type,
            self.group_hash,
            self.name_hash,
            service.identifier,
            service.port,
        );
        self.sender.send(&message.assemble());
    }

    /// The receive loop. Runs as one task until the stop flag is set or
    /// the task is aborted.
    async fn recv_loop(self: Arc<Self>, mut receiver: BroadcastRecv) {
        tracing::debug!("receive loop starting");

        while !self.stopping.load(Ordering::Relaxed) {
            let datagram = match tokio::time::timeout(RECV_POLL_INTERVAL, receiver.recv()).await {
                Ok(Ok(datagram)) => datagram,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "broadcast receive failed");
                    tokio::time::sleep(RECV_RETRY_DELAY).await;
                    continue;
                }
                // Idle poll expired: recheck the stop flag.
                Err(_) => continue,
            };

            self.handle_datagram(datagram.source, &datagram.payload);
        }

        tracing::debug!("receive loop stopped");
    }

    /// Process one inbound datagram. Synchronous, so the protocol
    /// semantics are testable without a socket.
    fn handle_datagram(&self, source: IpAddr, payload: &[u8]) {
        let message = match Message::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::trace!(error = %e, %source, "undecodable datagram ignored");
                return;
            }
        };

        if message.group_hash != self.group_hash {
            // Broadcast from a different group.
            tracing::trace!(%source, "datagram from another group ignored");
            return;
        }
        if message.name_hash == self.name_hash {
            // Our own broadcast echoed back.
            tracing::trace!("own broadcast ignored");
            return;
        }

        let service = DiscoveredService {
            address: source,
            name_hash: message.name_hash,
            identifier: message.service_id,
            port: message.port,
        };

        match message.msg_type {
            MessageType::Request => self.replay_offers(message.service_id),
            MessageType::Offer => {
                if self.discovered.insert(service) {
                    tracing::debug!(
                        service = %service.identifier,
                        port = service.port,
                        %source,
                        "service discovered"
                    );
                    self.dispatch_callbacks(service, false);
                }
            }
            MessageType::Leaving => {
                if self.discovered.remove(&service) {
                    tracing::debug!(
                        service = %service.identifier,
                        port = service.port,
                        %source,
                        "service departed"
                    );
                    self.dispatch_callbacks(service, true);
                }
            }
        }
    }

    /// Answer a REQUEST: re-announce every local service of the requested
    /// kind. The registered lock is released before sending.
    fn replay_offers(&self, identifier: ServiceIdentifier) {
        let matching: Vec<RegisteredService> = self
            .registered
            .snapshot()
            .into_iter()
            .filter(|service| service.identifier == identifier)
            .collect();

        for service in matching {
            tracing::trace!(service = %identifier, port = service.port, "replaying offer");
            self.send_message(MessageType::Offer, service);
        }
    }

    /// Invoke every registered callback on its own detached task, so a
    /// slow or re-entrant callback cannot stall the receive loop.
    fn dispatch_callbacks(&self, service: DiscoveredService, departing: bool) {
        for entry in self.callbacks.snapshot() {
            let callback = entry.callback;
            let user = entry.user;
            tokio::task::spawn_blocking(move || callback(service, departing, user));
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// The in-process discovery manager.
///
/// Construct with [`Manager::new`] (or [`Manager::from_config`]), then
/// call [`Manager::start`] to begin receiving. Tear down with
/// [`Manager::shutdown`], which stops and joins the receive task before
/// withdrawing every still-registered service with a LEAVING broadcast.
/// Dropping a manager without `shutdown` runs the same sweep but can
/// only abort the task, not join it; see [`Manager::shutdown`].
pub struct Manager {
    shared: Arc<Shared>,
    receiver: Option<BroadcastRecv>,
    local_addr: SocketAddr,
    task: Option<JoinHandle<()>>,
}

impl Manager {
    /// Create a manager for `group`, announcing as `name`.
    ///
    /// `broadcast` is where outbound datagrams go; `bind` is where the
    /// receiver listens. Must be called within a tokio runtime.
    pub fn new(
        broadcast: SocketAddr,
        bind: SocketAddr,
        group: &str,
        name: &str,
    ) -> io::Result<Self> {
        let sender = BroadcastSend::open(broadcast)?;
        let receiver = BroadcastRecv::bind(bind)?;
        let local_addr = receiver.local_addr()?;

        let group_hash = Md5Hash::of(group);
        let name_hash = Md5Hash::of(name);
        tracing::debug!(group = %group_hash, name = %name_hash, %local_addr, "manager created");

        Ok(Self {
            shared: Arc::new(Shared {
                group_hash,
                name_hash,
                sender,
                registered: ServiceSet::new(),
                discovered: ServiceSet::new(),
                callbacks: CallbackRegistry::new(),
                stopping: AtomicBool::new(false),
            }),
            receiver: Some(receiver),
            local_addr,
            task: None,
        })
    }

    /// Create a manager from loaded configuration.
    pub fn from_config(config: &ChirpConfig) -> io::Result<Self> {
        Self::new(
            config.broadcast_addr(),
            config.bind_addr(),
            &config.identity.group,
            &config.identity.name,
        )
    }

    /// Spawn the receive task.
    ///
    /// # Panics
    /// Calling `start` a second time is a programming error and panics.
    pub fn start(&mut self) {
        let receiver = match self.receiver.take() {
            Some(receiver) => receiver,
            None => panic!("Manager::start called twice"),
        };
        let shared = Arc::clone(&self.shared);
        self.task = Some(tokio::spawn(shared.recv_loop(receiver)));
    }

    /// Offer a service to the group.
    ///
    /// Returns true and broadcasts an OFFER iff the service was not
    /// already registered.
    pub fn register_service(&self, service: RegisteredService) -> bool {
        let inserted = self.shared.registered.insert(service);
        if inserted {
            tracing::debug!(service = %service.identifier, port = service.port, "service registered");
            self.shared.send_message(MessageType::Offer, service);
        }
        inserted
    }

    /// Withdraw a service.
    ///
    /// Returns true and broadcasts a LEAVING iff the service was actually
    /// removed.
    pub fn unregister_service(&self, service: RegisteredService) -> bool {
        let removed = self.shared.registered.remove(&service);
        if removed {
            tracing::debug!(service = %service.identifier, port = service.port, "service unregistered");
            self.shared.send_message(MessageType::Leaving, service);
        }
        removed
    }

    /// Withdraw every registered service, broadcasting a LEAVING for each
    /// in set order.
    pub fn unregister_services(&self) {
        for service in self.shared.registered.take_all() {
            tracing::debug!(service = %service.identifier, port = service.port, "service unregistered");
            self.shared.send_message(MessageType::Leaving, service);
        }
    }

    /// Snapshot of the locally registered services.
    pub fn registered_services(&self) -> BTreeSet<RegisteredService> {
        self.shared.registered.snapshot()
    }

    /// Snapshot of the remotely discovered services.
    pub fn discovered_services(&self) -> BTreeSet<DiscoveredService> {
        self.shared.discovered.snapshot()
    }

    /// Register a discovery callback. Returns true iff the (callback,
    /// user) pair was not already registered.
    pub fn register_discover_callback(&self, callback: DiscoverCallback, user: UserData) -> bool {
        self.shared.callbacks.register(callback, user)
    }

    /// Unregister a discovery callback. Returns true iff the pair was
    /// registered.
    pub fn unregister_discover_callback(&self, callback: DiscoverCallback, user: &UserData) -> bool {
        self.shared.callbacks.unregister(callback, user)
    }

    /// Drop every registered callback.
    pub fn unregister_discover_callbacks(&self) {
        self.shared.callbacks.clear();
    }

    /// Broadcast a REQUEST soliciting OFFERs for one service kind. Every
    /// group peer offering it replies with an OFFER per matching service.
    pub fn send_request(&self, identifier: ServiceIdentifier) {
        tracing::debug!(service = %identifier, "sending request");
        let message = Message::new(
            MessageType::Request,
            self.shared.group_hash,
            self.shared.name_hash,
            identifier,
            0,
        );
        self.shared.sender.send(&message.assemble());
    }

    /// Stop the receive task, wait for it to finish, then withdraw every
    /// registered service.
    ///
    /// The join guarantees ordering on teardown: once `shutdown` returns,
    /// no replayed OFFER can trail the LEAVING sweep, because the receive
    /// loop has fully exited before the sweep starts. The loop rechecks
    /// the stop flag at least every poll interval, so this completes in
    /// bounded time even on a silent network.
    pub async fn shutdown(mut self) {
        self.shared.stopping.store(true, Ordering::Relaxed);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "receive task ended abnormally");
            }
        }
        self.unregister_services();
    }

    /// The address the receive socket listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn group_hash(&self) -> Md5Hash {
        self.shared.group_hash
    }

    pub fn name_hash(&self) -> Md5Hash {
        self.shared.name_hash
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::Relaxed);
        // Fallback for a manager dropped without `shutdown`: Drop cannot
        // await the task, so abort is the best available. A datagram
        // being handled at this instant may still race the sweep below;
        // `shutdown` is the path that joins first and rules that out.
        if let Some(task) = self.task.take() {
            task.abort();
        }
        // Withdraw everything still registered while the socket is alive.
        self.unregister_services();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;
    use std::sync::atomic::AtomicUsize;

    const GROUP: &str = "test-group";
    const NAME: &str = "local-peer";

    /// A manager wired to a local sink socket, so every broadcast it
    /// sends can be observed.
    fn manager_with_sink() -> (Manager, StdUdpSocket) {
        let sink = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        sink.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let manager = Manager::new(
            sink.local_addr().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            GROUP,
            NAME,
        )
        .unwrap();
        (manager, sink)
    }

    fn recv_message(sink: &StdUdpSocket) -> Message {
        let mut buf = [0u8; 64];
        let (len, _) = sink.recv_from(&mut buf).unwrap();
        Message::parse(&buf[..len]).unwrap()
    }

    fn remote_message(
        msg_type: MessageType,
        group: &str,
        name: &str,
        service_id: ServiceIdentifier,
        port: u16,
    ) -> Vec<u8> {
        Message::new(msg_type, Md5Hash::of(group), Md5Hash::of(name), service_id, port)
            .assemble()
            .to_vec()
    }

    fn control(port: u16) -> RegisteredService {
        RegisteredService {
            identifier: ServiceIdentifier::Control,
            port,
        }
    }

    const REMOTE_IP: &str = "192.0.2.7";

    fn deliver(manager: &Manager, payload: &[u8]) {
        manager.shared.handle_datagram(REMOTE_IP.parse().unwrap(), payload);
    }

    /// Wait for the counter driven by `counting_callback` to settle at
    /// `expected`. Dispatch is detached, so give it a moment.
    async fn await_count(counter: &Arc<AtomicUsize>, expected: usize) {
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), expected);
    }

    fn counting_callback(_service: DiscoveredService, _departing: bool, user: UserData) {
        if let Some(counter) = user.downcast_ref::<AtomicUsize>() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn departing_callback(service: DiscoveredService, departing: bool, user: UserData) {
        if let Some(log) = user.downcast_ref::<parking_lot::Mutex<Vec<(u16, bool)>>>() {
            log.lock().push((service.port, departing));
        }
    }

    async fn await_len(log: &Arc<parking_lot::Mutex<Vec<(u16, bool)>>>, expected: usize) {
        for _ in 0..100 {
            if log.lock().len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(log.lock().len(), expected);
    }

    // ── Registration ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn register_is_idempotent_and_offers_once() {
        let (manager, sink) = manager_with_sink();

        assert!(manager.register_service(control(7000)));
        assert!(!manager.register_service(control(7000)));
        assert!(!manager.register_service(control(7000)));

        let offer = recv_message(&sink);
        assert_eq!(offer.msg_type, MessageType::Offer);
        assert_eq!(offer.group_hash, Md5Hash::of(GROUP));
        assert_eq!(offer.name_hash, Md5Hash::of(NAME));
        assert_eq!(offer.port, 7000);

        // No second datagram for the duplicate registrations.
        sink.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut buf = [0u8; 64];
        assert!(sink.recv_from(&mut buf).is_err(), "duplicate register must not broadcast");
    }

    #[tokio::test]
    async fn unregister_emits_leaving_only_on_removal() {
        let (manager, sink) = manager_with_sink();

        manager.register_service(control(7000));
        let _offer = recv_message(&sink);

        assert!(manager.unregister_service(control(7000)));
        let leaving = recv_message(&sink);
        assert_eq!(leaving.msg_type, MessageType::Leaving);
        assert_eq!(leaving.port, 7000);

        assert!(!manager.unregister_service(control(7000)));
        sink.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut buf = [0u8; 64];
        assert!(sink.recv_from(&mut buf).is_err(), "no LEAVING without a removal");
    }

    #[tokio::test]
    async fn registered_snapshot_reflects_the_set() {
        let (manager, _sink) = manager_with_sink();
        manager.register_service(control(7000));
        manager.register_service(RegisteredService {
            identifier: ServiceIdentifier::Data,
            port: 9000,
        });

        let snapshot = manager.registered_services();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&control(7000)));
    }

    // ── Inbound filtering ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn own_name_hash_is_dropped() {
        let (manager, _sink) = manager_with_sink();

        // An OFFER carrying our own name hash, as a broadcast echo would.
        deliver(
            &manager,
            &remote_message(MessageType::Offer, GROUP, NAME, ServiceIdentifier::Control, 7000),
        );
        assert!(manager.discovered_services().is_empty());
    }

    #[tokio::test]
    async fn other_group_is_dropped() {
        let (manager, _sink) = manager_with_sink();
        let counter = Arc::new(AtomicUsize::new(0));
        manager.register_discover_callback(counting_callback, Arc::clone(&counter) as UserData);

        deliver(
            &manager,
            &remote_message(MessageType::Offer, "other-group", "peer", ServiceIdentifier::Control, 7000),
        );

        assert!(manager.discovered_services().is_empty());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0, "no callback for a foreign group");
    }

    #[tokio::test]
    async fn undecodable_datagrams_are_ignored() {
        let (manager, _sink) = manager_with_sink();

        deliver(&manager, b"");
        deliver(&manager, b"not a chirp datagram at all, wrong length too");
        let mut corrupt =
            remote_message(MessageType::Offer, GROUP, "peer", ServiceIdentifier::Control, 7000);
        corrupt[0] = b'X';
        deliver(&manager, &corrupt);

        assert!(manager.discovered_services().is_empty());
    }

    // ── OFFER / LEAVING ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn offer_inserts_and_fires_callback_once() {
        let (manager, _sink) = manager_with_sink();
        let counter = Arc::new(AtomicUsize::new(0));
        manager.register_discover_callback(counting_callback, Arc::clone(&counter) as UserData);

        let offer = remote_message(MessageType::Offer, GROUP, "peer", ServiceIdentifier::Control, 7000);
        deliver(&manager, &offer);
        await_count(&counter, 1).await;

        let discovered = manager.discovered_services();
        assert_eq!(discovered.len(), 1);
        let entry = discovered.iter().next().unwrap();
        assert_eq!(entry.address, REMOTE_IP.parse::<IpAddr>().unwrap());
        assert_eq!(entry.name_hash, Md5Hash::of("peer"));
        assert_eq!(entry.port, 7000);

        // A duplicate OFFER neither re-inserts nor re-fires.
        deliver(&manager, &offer);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.discovered_services().len(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leaving_removes_and_fires_with_departing() {
        let (manager, _sink) = manager_with_sink();
        let log: Arc<parking_lot::Mutex<Vec<(u16, bool)>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
        manager.register_discover_callback(departing_callback, Arc::clone(&log) as UserData);

        // Wait out each dispatch so the log order is the event order.
        deliver(
            &manager,
            &remote_message(MessageType::Offer, GROUP, "peer", ServiceIdentifier::Control, 7000),
        );
        await_len(&log, 1).await;

        deliver(
            &manager,
            &remote_message(MessageType::Leaving, GROUP, "peer", ServiceIdentifier::Control, 7000),
        );
        await_len(&log, 2).await;

        assert!(manager.discovered_services().is_empty());
        let events = log.lock().clone();
        assert_eq!(events, vec![(7000, false), (7000, true)]);
    }

    #[tokio::test]
    async fn leaving_for_unknown_service_is_silent() {
        let (manager, _sink) = manager_with_sink();
        let counter = Arc::new(AtomicUsize::new(0));
        manager.register_discover_callback(counting_callback, Arc::clone(&counter) as UserData);

        deliver(
            &manager,
            &remote_message(MessageType::Leaving, GROUP, "peer", ServiceIdentifier::Control, 7000),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.discovered_services().is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unregistered_callback_no_longer_fires() {
        let (manager, _sink) = manager_with_sink();
        let counter = Arc::new(AtomicUsize::new(0));
        let user = Arc::clone(&counter) as UserData;

        assert!(manager.register_discover_callback(counting_callback, Arc::clone(&user)));
        assert!(manager.unregister_discover_callback(counting_callback, &user));

        deliver(
            &manager,
            &remote_message(MessageType::Offer, GROUP, "peer", ServiceIdentifier::Control, 7000),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.discovered_services().len(), 1, "the set still updates");
        assert_eq!(counter.load(Ordering::SeqCst), 0, "but no callback fires");
    }

    // ── REQUEST replay ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn request_replays_matching_offers_only() {
        let (manager, sink) = manager_with_sink();

        manager.register_service(control(7000));
        manager.register_service(control(7001));
        manager.register_service(RegisteredService {
            identifier: ServiceIdentifier::Data,
            port: 9000,
        });
        for _ in 0..3 {
            let _registration_offer = recv_message(&sink);
        }

        deliver(
            &manager,
            &remote_message(MessageType::Request, GROUP, "joiner", ServiceIdentifier::Control, 0),
        );

        let mut replayed_ports = vec![recv_message(&sink), recv_message(&sink)]
            .into_iter()
            .map(|m| {
                assert_eq!(m.msg_type, MessageType::Offer);
                assert_eq!(m.service_id, ServiceIdentifier::Control);
                m.port
            })
            .collect::<Vec<_>>();
        replayed_ports.sort_unstable();
        assert_eq!(replayed_ports, vec![7000, 7001]);

        // Nothing further: the DATA service was not requested.
        sink.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut buf = [0u8; 64];
        assert!(sink.recv_from(&mut buf).is_err());
    }

    #[tokio::test]
    async fn request_for_unoffered_kind_is_silent() {
        let (manager, sink) = manager_with_sink();
        manager.register_service(control(7000));
        let _registration_offer = recv_message(&sink);

        deliver(
            &manager,
            &remote_message(MessageType::Request, GROUP, "joiner", ServiceIdentifier::Monitoring, 0),
        );

        sink.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut buf = [0u8; 64];
        assert!(sink.recv_from(&mut buf).is_err());
    }

    #[tokio::test]
    async fn send_request_puts_a_request_on_the_wire() {
        let (manager, sink) = manager_with_sink();

        manager.send_request(ServiceIdentifier::Heartbeat);

        let request = recv_message(&sink);
        assert_eq!(request.msg_type, MessageType::Request);
        assert_eq!(request.service_id, ServiceIdentifier::Heartbeat);
        assert_eq!(request.port, 0);
        assert_eq!(request.name_hash, Md5Hash::of(NAME));
    }
}
