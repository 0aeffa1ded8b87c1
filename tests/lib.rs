use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use chunknet::transport::{ConsoleListener, ConsoleStream, DatagramSocket, NetType};
use chunknet::{
    BanInfo, BanType, Chunk, ClientId, ClientState, ConnectionConfig, ConnectionState, ConsoleConfig, ControlMessage, Huffman,
    NetClient, NetConsole, NetError, NetServer, PacketConstruct, ServerConfig, NET_TOKENREQUEST_DATASIZE, NET_TOKEN_NONE,
    SENDFLAG_FLUSH, SENDFLAG_VITAL,
};

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default)]
struct Network {
    queues: HashMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>,
    muted: HashSet<SocketAddr>,
}

#[derive(Debug, Clone)]
struct MockSocket {
    addr: SocketAddr,
    network: Rc<RefCell<Network>>,
}

impl DatagramSocket for MockSocket {
    fn addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn net_type(&self) -> NetType {
        NetType::of(&self.addr)
    }

    fn try_recv(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut network = self.network.borrow_mut();
        let Some((from, data)) = network.queues.get_mut(&self.addr).and_then(|q| q.pop_front()) else {
            return Ok(None);
        };
        buffer[..data.len()].copy_from_slice(&data);
        Ok(Some((data.len(), from)))
    }

    fn send(&mut self, addr: SocketAddr, packet: &[u8]) -> io::Result<()> {
        let mut network = self.network.borrow_mut();
        if network.muted.contains(&self.addr) {
            return Ok(());
        }
        network.queues.entry(addr).or_default().push_back((self.addr, packet.to_vec()));
        Ok(())
    }
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn server_addr() -> SocketAddr {
    addr("127.0.0.1:8303")
}

#[derive(Debug, Default)]
struct Events {
    connected: Vec<(ClientId, SocketAddr)>,
    disconnected: Vec<(ClientId, String)>,
}

fn setup_server(network: &Rc<RefCell<Network>>, config: ServerConfig) -> (NetServer, Rc<RefCell<Events>>) {
    let socket = MockSocket {
        addr: server_addr(),
        network: network.clone(),
    };
    let mut server = NetServer::new(Box::new(socket), config);

    let events = Rc::new(RefCell::new(Events::default()));
    let connected = events.clone();
    let disconnected = events.clone();
    server.set_callbacks(
        move |client_id, addr| connected.borrow_mut().connected.push((client_id, addr)),
        move |client_id, reason| disconnected.borrow_mut().disconnected.push((client_id, reason.to_owned())),
    );

    (server, events)
}

fn setup_client(network: &Rc<RefCell<Network>>, client_addr: &str) -> NetClient {
    let socket = MockSocket {
        addr: addr(client_addr),
        network: network.clone(),
    };
    NetClient::new(Box::new(socket), ConnectionConfig::default())
}

fn raw_socket(network: &Rc<RefCell<Network>>, raw_addr: &str) -> MockSocket {
    MockSocket {
        addr: addr(raw_addr),
        network: network.clone(),
    }
}

fn drain_server(server: &mut NetServer) -> Vec<Chunk> {
    let mut chunks = vec![];
    while let Some(chunk) = server.recv().unwrap() {
        chunks.push(chunk);
    }
    chunks
}

fn drain_client(client: &mut NetClient) -> Vec<Chunk> {
    let mut chunks = vec![];
    while let Some(chunk) = client.recv().unwrap() {
        chunks.push(chunk);
    }
    chunks
}

fn pump(server: &mut NetServer, clients: &mut [&mut NetClient]) {
    for _ in 0..5 {
        drain_server(server);
        for client in clients.iter_mut() {
            drain_client(client);
        }
    }
}

fn connect(server: &mut NetServer, client: &mut NetClient) {
    client.connect(server_addr());
    pump(server, &mut [&mut *client]);
    assert_eq!(client.state(), ClientState::Online);
}

fn recv_raw(socket: &mut MockSocket) -> Option<PacketConstruct> {
    let mut buffer = [0u8; 2800];
    let (len, _) = socket.try_recv(&mut buffer).unwrap()?;
    Some(PacketConstruct::unpack(&buffer[..len], &Huffman::new()).unwrap())
}

#[test]
fn handshake() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, events) = setup_server(&network, ServerConfig::default());
    let mut client = setup_client(&network, "127.0.0.1:6000");

    client.connect(server_addr());
    assert_eq!(client.state(), ClientState::Connecting);
    pump(&mut server, &mut [&mut client]);

    assert_eq!(client.state(), ClientState::Online);
    assert_eq!(server.client_state(ClientId::from_raw(0)), Some(ConnectionState::Online));
    assert_eq!(server.client_addr(ClientId::from_raw(0)), Some(addr("127.0.0.1:6000")));
    assert_eq!(server.connected_clients(), 1);
    assert_eq!(events.borrow().connected, vec![(ClientId::from_raw(0), addr("127.0.0.1:6000"))]);
    assert_eq!(client.server_addr(), Some(server_addr()));
}

#[test]
fn vital_chunks_in_order_across_sequence_wrap() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, _) = setup_server(&network, ServerConfig::default());
    let mut client = setup_client(&network, "127.0.0.1:6000");
    connect(&mut server, &mut client);

    let client_id = ClientId::from_raw(0);
    let client_addr = addr("127.0.0.1:6000");
    let mut received = vec![];
    for round in 0..30u32 {
        for i in 0..50u32 {
            let value = round * 50 + i;
            client.send(&Chunk::new(client_id, server_addr(), SENDFLAG_VITAL, value.to_le_bytes().to_vec())).unwrap();
        }
        client.flush();

        for chunk in drain_server(&mut server) {
            assert_eq!(chunk.client_id, Some(client_id));
            let bytes: [u8; 4] = chunk.data[..].try_into().unwrap();
            received.push(u32::from_le_bytes(bytes));
        }

        // Any packet from the server carries the ack
        server.send(&Chunk::new(client_id, client_addr, SENDFLAG_FLUSH, "ack")).unwrap();
        let acks = drain_client(&mut client);
        assert_eq!(acks.len(), 1);
    }

    let expected: Vec<u32> = (0..1500).collect();
    assert_eq!(received, expected);
    assert_eq!(client.stats().resent_chunks, 0);
}

#[test]
fn lost_vital_chunk_resent_after_timeout() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, _) = setup_server(&network, ServerConfig::default());
    let mut client = setup_client(&network, "127.0.0.1:6000");
    connect(&mut server, &mut client);

    network.borrow_mut().muted.insert(addr("127.0.0.1:6000"));
    let chunk = Chunk::new(ClientId::from_raw(0), server_addr(), SENDFLAG_VITAL | SENDFLAG_FLUSH, "lost");
    client.send(&chunk).unwrap();
    assert!(drain_server(&mut server).is_empty());
    network.borrow_mut().muted.clear();

    client.update(Duration::from_millis(999));
    assert!(drain_server(&mut server).is_empty());

    client.update(Duration::from_millis(1));
    let chunks = drain_server(&mut server);
    assert_eq!(chunks.len(), 1);
    assert_eq!(&chunks[0].data[..], b"lost");
    assert_eq!(chunks[0].flags, SENDFLAG_VITAL);
    assert_eq!(client.stats().resent_chunks, 1);
}

#[test]
fn server_vital_stream_acked_by_keepalives() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, _) = setup_server(&network, ServerConfig::default());
    let mut client = setup_client(&network, "127.0.0.1:6000");
    connect(&mut server, &mut client);

    let client_id = ClientId::from_raw(0);
    let client_addr = addr("127.0.0.1:6000");
    for round in 0..40u8 {
        let chunk = Chunk::new(client_id, client_addr, SENDFLAG_VITAL | SENDFLAG_FLUSH, vec![round; 1000]);
        server.send(&chunk).unwrap();

        let chunks = drain_client(&mut client);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data[0], round);

        // The client has nothing to send but keep-alives
        client.update(Duration::from_secs(1));
        assert!(drain_server(&mut server).is_empty());
        server.update(Duration::from_secs(1));
        assert!(drain_client(&mut client).is_empty());
    }

    assert_eq!(server.client_stats(client_id).unwrap().resent_chunks, 0);
    assert_eq!(server.client_state(client_id), Some(ConnectionState::Online));
}

#[test]
fn duplicate_vital_chunk_delivered_once() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, _) = setup_server(&network, ServerConfig::default());
    let mut client = setup_client(&network, "127.0.0.1:6000");
    connect(&mut server, &mut client);

    let chunk = Chunk::new(ClientId::from_raw(0), server_addr(), SENDFLAG_VITAL | SENDFLAG_FLUSH, "once");
    client.send(&chunk).unwrap();
    assert_eq!(drain_server(&mut server).len(), 1);

    // Never acked, so it is resent
    client.update(Duration::from_secs(1));
    assert!(drain_server(&mut server).is_empty());
}

#[test]
fn token_spoof_rejected() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, events) = setup_server(&network, ServerConfig::default());
    let mut spoofer = raw_socket(&network, "10.0.0.66:4000");

    let mut connect = PacketConstruct::control(ControlMessage::Connect, &0x1234u32.to_be_bytes());
    connect.token = 0xDEAD_BEEF;
    spoofer.send(server_addr(), &connect.pack(&Huffman::new())).unwrap();

    assert!(drain_server(&mut server).is_empty());
    assert_eq!(server.connected_clients(), 0);
    assert!(events.borrow().connected.is_empty());
    assert!(recv_raw(&mut spoofer).is_none());
}

#[test]
fn short_token_request_ignored() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, _) = setup_server(&network, ServerConfig::default());
    let mut raw = raw_socket(&network, "10.0.0.5:4000");

    let request = PacketConstruct::control(ControlMessage::Token, &[0; 16]);
    raw.send(server_addr(), &request.pack(&Huffman::new())).unwrap();
    assert!(drain_server(&mut server).is_empty());
    assert!(recv_raw(&mut raw).is_none());
}

#[test]
fn malformed_packets_dropped() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, _) = setup_server(&network, ServerConfig::default());
    let mut client = setup_client(&network, "127.0.0.1:6000");
    connect(&mut server, &mut client);

    let stats = *server.client_stats(ClientId::from_raw(0)).unwrap();
    let mut raw = raw_socket(&network, "127.0.0.1:6000");
    raw.send(server_addr(), &[0, 1]).unwrap();
    // Current layout, two bytes short of the header
    raw.send(server_addr(), &[0, 0, 0, 1, 0, 0, 0, 0, 0]).unwrap();
    // Short buffers without the zero prefix decode as legacy and are dropped as such
    raw.send(server_addr(), &[0x10, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
    raw.send(server_addr(), &[0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0]).unwrap();
    raw.send(server_addr(), &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 5, 1, 2]).unwrap();

    assert!(drain_server(&mut server).is_empty());
    assert_eq!(server.client_state(ClientId::from_raw(0)), Some(ConnectionState::Online));
    assert_eq!(*server.client_stats(ClientId::from_raw(0)).unwrap(), stats);
}

#[test]
fn connless_with_token() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, _) = setup_server(&network, ServerConfig::default());
    let mut raw = raw_socket(&network, "10.0.0.9:1234");
    let huffman = Huffman::new();

    let mut extra = vec![0; NET_TOKENREQUEST_DATASIZE];
    extra[..4].copy_from_slice(&0xABCDu32.to_be_bytes());
    let request = PacketConstruct::control(ControlMessage::Token, &extra);
    raw.send(server_addr(), &request.pack(&huffman)).unwrap();
    assert!(drain_server(&mut server).is_empty());

    let reply = recv_raw(&mut raw).unwrap();
    assert_eq!(reply.control_message(), Some(ControlMessage::Token));
    assert_eq!(reply.token, 0xABCD);
    let server_token = u32::from_be_bytes(reply.control_extra()[..4].try_into().unwrap());

    let bad = PacketConstruct::connless(server_token ^ 1, NET_TOKEN_NONE, b"getinfo");
    raw.send(server_addr(), &bad.pack(&huffman)).unwrap();
    assert!(drain_server(&mut server).is_empty());

    let good = PacketConstruct::connless(server_token, 0x5555, b"getinfo");
    raw.send(server_addr(), &good.pack(&huffman)).unwrap();
    let chunks = drain_server(&mut server);
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_connless());
    assert_eq!(chunks[0].client_id, None);
    assert_eq!(chunks[0].response_token, 0x5555);
    assert_eq!(&chunks[0].data[..], b"getinfo");

    server.send(&Chunk::connless(chunks[0].addr, chunks[0].response_token, "info")).unwrap();
    let answer = recv_raw(&mut raw).unwrap();
    assert!(answer.is_connless());
    assert_eq!(answer.token, 0x5555);
    assert_eq!(answer.response_token, server_token);
    assert_eq!(answer.data, b"info");
}

#[test]
fn server_full() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let config = ServerConfig {
        max_clients: 1,
        ..Default::default()
    };
    let (mut server, events) = setup_server(&network, config);
    let mut first = setup_client(&network, "127.0.0.1:6000");
    let mut second = setup_client(&network, "127.0.0.2:6000");
    connect(&mut server, &mut first);

    second.connect(server_addr());
    pump(&mut server, &mut [&mut first, &mut second]);
    assert_eq!(second.state(), ClientState::Offline);
    assert_eq!(second.error_string(), "This server is full");
    assert_eq!(events.borrow().connected.len(), 1);
}

#[test]
fn clients_per_ip_limited() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, _) = setup_server(&network, ServerConfig::default());
    server.set_max_clients_per_ip(1);
    let mut first = setup_client(&network, "127.0.0.1:6000");
    let mut second = setup_client(&network, "127.0.0.1:6001");
    connect(&mut server, &mut first);

    second.connect(server_addr());
    pump(&mut server, &mut [&mut first, &mut second]);
    assert_eq!(second.state(), ClientState::Offline);
    assert_eq!(second.error_string(), "Only 1 players with the same IP are allowed");
    assert_eq!(server.connected_clients(), 1);
}

#[test]
fn client_disconnect() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, events) = setup_server(&network, ServerConfig::default());
    let mut client = setup_client(&network, "127.0.0.1:6000");
    connect(&mut server, &mut client);

    client.disconnect("bye");
    assert_eq!(client.state(), ClientState::Offline);
    drain_server(&mut server);

    assert_eq!(events.borrow().disconnected, vec![(ClientId::from_raw(0), "bye".to_owned())]);
    assert_eq!(server.connected_clients(), 0);
    assert_eq!(server.client_addr(ClientId::from_raw(0)), None);
    // No close echoed back
    assert!(network.borrow().queues.get(&addr("127.0.0.1:6000")).map_or(true, |q| q.is_empty()));
}

#[test]
fn server_drops_client() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, events) = setup_server(&network, ServerConfig::default());
    let mut client = setup_client(&network, "127.0.0.1:6000");
    connect(&mut server, &mut client);

    server.drop_client(ClientId::from_raw(0), "kicked").unwrap();
    assert_eq!(events.borrow().disconnected, vec![(ClientId::from_raw(0), "kicked".to_owned())]);
    assert!(matches!(server.drop_client(ClientId::from_raw(0), "again"), Err(NetError::ClientNotFound(0))));

    drain_client(&mut client);
    assert_eq!(client.state(), ClientState::Offline);
    assert_eq!(client.error_string(), "kicked");
    client.reset_error_string();
    assert_eq!(client.error_string(), "");
}

#[test]
fn timeout_releases_slot() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, events) = setup_server(&network, ServerConfig::default());
    let mut client = setup_client(&network, "127.0.0.1:6000");
    connect(&mut server, &mut client);

    server.update(Duration::from_secs(5));
    assert_eq!(server.connected_clients(), 1);
    server.update(Duration::from_secs(6));
    assert_eq!(server.connected_clients(), 0);
    assert_eq!(events.borrow().disconnected, vec![(ClientId::from_raw(0), "Timeout".to_owned())]);
}

#[test]
fn client_got_problems() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, _) = setup_server(&network, ServerConfig::default());
    let mut client = setup_client(&network, "127.0.0.1:6000");
    connect(&mut server, &mut client);

    assert!(!client.got_problems());
    client.update(Duration::from_millis(1500));
    assert!(client.got_problems());

    client.update(Duration::from_secs(10));
    assert_eq!(client.state(), ClientState::Offline);
    assert_eq!(client.error_string(), "Timeout");
    assert!(!client.got_problems());
}

#[test]
fn banned_address() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, events) = setup_server(&network, ServerConfig::default());
    server.set_ban(|addr: &SocketAddr| -> Option<BanInfo> {
        match addr.port() {
            6666 => Some(BanInfo {
                ban_type: BanType::Drop,
                reason: "cheating".to_owned(),
            }),
            7777 => Some(BanInfo {
                ban_type: BanType::Soft,
                reason: String::new(),
            }),
            _ => None,
        }
    });

    let mut hard = setup_client(&network, "127.0.0.1:6666");
    hard.connect(server_addr());
    pump(&mut server, &mut [&mut hard]);
    assert_eq!(hard.state(), ClientState::Offline);
    assert_eq!(hard.error_string(), "You have been banned (cheating)");

    let mut soft = setup_client(&network, "127.0.0.1:7777");
    soft.connect(server_addr());
    pump(&mut server, &mut [&mut soft]);
    assert_eq!(soft.state(), ClientState::Connecting);
    assert!(events.borrow().connected.is_empty());
}

#[test]
fn oversized_chunks_refused() {
    init_log();
    let network = Rc::new(RefCell::new(Network::default()));
    let (mut server, _) = setup_server(&network, ServerConfig::default());
    let mut client = setup_client(&network, "127.0.0.1:6000");
    connect(&mut server, &mut client);

    let chunk = Chunk::new(ClientId::from_raw(0), server_addr(), SENDFLAG_VITAL, vec![0; 1025]);
    assert!(matches!(client.send(&chunk), Err(NetError::ChunkTooLarge(1025))));
    let chunk = Chunk::new(ClientId::from_raw(0), server_addr(), 0, vec![0; 1394]);
    assert!(matches!(client.send(&chunk), Err(NetError::ChunkTooLarge(1394))));
}

#[test]
fn native_sockets() {
    init_log();
    let mut server = NetServer::open(addr("127.0.0.1:0"), ServerConfig::default(), 0).unwrap();
    let server_addr = server.addr().unwrap();
    let mut client = NetClient::open(addr("127.0.0.1:0"), ConnectionConfig::default(), 0).unwrap();
    assert_eq!(client.net_type(), NetType::Ipv4);

    client.connect(server_addr);
    let mut received = vec![];
    let mut sent = false;
    for _ in 0..200 {
        received.extend(drain_server(&mut server));
        drain_client(&mut client);
        if client.is_connected() && !sent {
            let chunk = Chunk::new(ClientId::from_raw(0), server_addr, SENDFLAG_VITAL | SENDFLAG_FLUSH, "hello over udp");
            client.send(&chunk).unwrap();
            sent = true;
        }
        if !received.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(received.len(), 1);
    assert_eq!(&received[0].data[..], b"hello over udp");
}

#[derive(Debug, Default)]
struct Pipe {
    incoming: VecDeque<Vec<u8>>,
    outgoing: Vec<u8>,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
struct MockStream(Rc<RefCell<Pipe>>);

impl ConsoleStream for MockStream {
    fn try_read(&mut self, buffer: &mut [u8]) -> io::Result<Option<usize>> {
        let mut pipe = self.0.borrow_mut();
        match pipe.incoming.pop_front() {
            Some(data) => {
                buffer[..data.len()].copy_from_slice(&data);
                Ok(Some(data.len()))
            }
            None if pipe.closed => Ok(Some(0)),
            None => Ok(None),
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.borrow_mut().outgoing.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) {
        self.0.borrow_mut().closed = true;
    }
}

#[derive(Debug, Default)]
struct MockListener {
    pending: Rc<RefCell<VecDeque<(MockStream, SocketAddr)>>>,
}

impl ConsoleListener for MockListener {
    fn addr(&self) -> io::Result<SocketAddr> {
        Ok(addr("127.0.0.1:8304"))
    }

    fn try_accept(&mut self) -> io::Result<Option<(Box<dyn ConsoleStream>, SocketAddr)>> {
        Ok(self
            .pending
            .borrow_mut()
            .pop_front()
            .map(|(stream, addr)| (Box::new(stream) as Box<dyn ConsoleStream>, addr)))
    }
}

#[test]
fn console_sessions() {
    init_log();
    let listener = MockListener::default();
    let pending = listener.pending.clone();
    let mut console = NetConsole::new(Box::new(listener), ConsoleConfig { max_clients: 2 });

    let dropped = Rc::new(RefCell::new(vec![]));
    let dropped_clone = dropped.clone();
    console.set_callbacks(|_, _| {}, move |id, reason| dropped_clone.borrow_mut().push((id, reason.to_owned())));

    let admin = MockStream::default();
    let same_ip = MockStream::default();
    let other = MockStream::default();
    let overflow = MockStream::default();
    pending.borrow_mut().push_back((admin.clone(), addr("10.0.0.1:5000")));
    pending.borrow_mut().push_back((same_ip.clone(), addr("10.0.0.1:5001")));
    pending.borrow_mut().push_back((other.clone(), addr("10.0.0.2:5000")));
    pending.borrow_mut().push_back((overflow.clone(), addr("10.0.0.3:5000")));
    console.update().unwrap();

    assert_eq!(console.client_addr(ClientId::from_raw(0)), Some(addr("10.0.0.1:5000")));
    assert_eq!(console.client_addr(ClientId::from_raw(1)), Some(addr("10.0.0.2:5000")));
    assert_eq!(same_ip.0.borrow().outgoing, b"only one client per IP allowed");
    assert!(same_ip.0.borrow().closed);
    assert_eq!(overflow.0.borrow().outgoing, b"no free slot available");

    admin.0.borrow_mut().incoming.push_back(b"status\r\n".to_vec());
    console.update().unwrap();
    assert_eq!(console.recv(), Some((ClientId::from_raw(0), "status".to_owned())));
    assert_eq!(console.recv(), None);

    console.send(ClientId::from_raw(0), "2 players").unwrap();
    assert_eq!(admin.0.borrow().outgoing, b"2 players\r\n");

    other.0.borrow_mut().closed = true;
    console.update().unwrap();
    assert_eq!(console.client_addr(ClientId::from_raw(1)), None);
    assert_eq!(
        *dropped.borrow(),
        vec![(ClientId::from_raw(1), "remote end closed the connection".to_owned())]
    );

    console.drop_client(ClientId::from_raw(0), "bye").unwrap();
    assert!(admin.0.borrow().outgoing.ends_with(b"bye\r\n"));
    assert!(admin.0.borrow().closed);
}

#[test]
fn random_payloads_survive_packing() {
    use rand::Rng;

    init_log();
    let huffman = Huffman::new();
    let mut rng = rand::thread_rng();
    for _ in 0..64 {
        let len = rng.gen_range(0..1200);
        let data: Vec<u8> = if rng.gen_bool(0.5) {
            (0..len).map(|_| rng.gen()).collect()
        } else {
            (0..len).map(|_| rng.gen_range(0..4)).collect()
        };

        let packet = PacketConstruct {
            token: rng.gen(),
            ack: rng.gen_range(0..1024),
            data,
            ..Default::default()
        };
        let decoded = PacketConstruct::unpack(&packet.pack(&huffman), &huffman).unwrap();
        assert_eq!(decoded, packet);
    }
}

#[test]
fn console_bans() {
    init_log();
    let listener = MockListener::default();
    let pending = listener.pending.clone();
    let mut console = NetConsole::new(Box::new(listener), ConsoleConfig::default());
    console.set_ban(|addr: &SocketAddr| -> Option<BanInfo> {
        match addr.port() {
            6666 => Some(BanInfo {
                ban_type: BanType::Drop,
                reason: "spam".to_owned(),
            }),
            7777 => Some(BanInfo {
                ban_type: BanType::Soft,
                reason: "quiet".to_owned(),
            }),
            _ => None,
        }
    });

    let hard = MockStream::default();
    let soft = MockStream::default();
    pending.borrow_mut().push_back((hard.clone(), addr("10.0.0.1:6666")));
    pending.borrow_mut().push_back((soft.clone(), addr("10.0.0.2:7777")));
    console.update().unwrap();

    assert_eq!(hard.0.borrow().outgoing, b"You have been banned (spam)");
    assert!(hard.0.borrow().closed);
    assert!(soft.0.borrow().outgoing.is_empty());
    assert!(soft.0.borrow().closed);
    assert_eq!(console.client_addr(ClientId::from_raw(0)), None);
    assert_eq!(console.client_addr(ClientId::from_raw(1)), None);
}
