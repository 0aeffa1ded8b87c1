use chunknet::{Chunk, ClientId, ConnectionConfig, NetClient, NetServer, ServerConfig, SENDFLAG_FLUSH, SENDFLAG_VITAL};
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();
    println!("Usage: server [SERVER_PORT] or client [SERVER_PORT]");
    let args: Vec<String> = std::env::args().collect();

    let exec_type = &args[1];
    let server_addr: SocketAddr = format!("127.0.0.1:{}", args[2]).parse().unwrap();
    match exec_type.as_str() {
        "client" => client(server_addr),
        "server" => server(server_addr),
        _ => {
            println!("Invalid argument, first one must be \"client\" or \"server\".");
        }
    }
}

fn server(addr: SocketAddr) {
    let mut server = NetServer::open(addr, ServerConfig::default(), 0).unwrap();
    server.set_callbacks(
        |client_id, addr| println!("Client {} connected from {}.", client_id, addr),
        |client_id, reason| println!("Client {} disconnected: {}", client_id, reason),
    );

    let mut received_messages: Vec<(ClientId, String)> = vec![];
    let mut last_updated = Instant::now();
    loop {
        received_messages.clear();
        while let Some(chunk) = server.recv().unwrap() {
            let Some(client_id) = chunk.client_id else {
                continue;
            };
            let text = String::from_utf8_lossy(&chunk.data).to_string();
            println!("Client {} sent message {:?}.", client_id, text);
            received_messages.push((client_id, text));
        }

        for (sender, text) in received_messages.iter() {
            for client_id in server.clients_id() {
                let Some(addr) = server.client_addr(client_id) else {
                    continue;
                };
                let message = format!("{}: {}", sender, text);
                let chunk = Chunk::new(client_id, addr, SENDFLAG_VITAL, message);
                if let Err(e) = server.send(&chunk) {
                    println!("Failed to send to client {}: {}", client_id, e);
                }
            }
        }

        server.update(Instant::now() - last_updated);
        last_updated = Instant::now();
        thread::sleep(Duration::from_millis(50));
    }
}

fn client(server_addr: SocketAddr) {
    let mut client = NetClient::open("127.0.0.1:0".parse().unwrap(), ConnectionConfig::default(), 0).unwrap();
    client.connect(server_addr);
    let stdin_channel = spawn_stdin_channel();

    let mut last_updated = Instant::now();
    loop {
        client.update(Instant::now() - last_updated);
        last_updated = Instant::now();
        if client.state() == chunknet::ClientState::Offline {
            panic!("Client error: {}", client.error_string());
        }

        match stdin_channel.try_recv() {
            Ok(text) => {
                if client.is_connected() {
                    let chunk = Chunk::new(ClientId::from_raw(0), server_addr, SENDFLAG_VITAL | SENDFLAG_FLUSH, text);
                    client.send(&chunk).unwrap();
                } else {
                    println!("Client is not yet connected");
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => panic!("Stdin channel disconnected"),
        }

        while let Some(chunk) = client.recv().unwrap() {
            println!("{}", String::from_utf8_lossy(&chunk.data));
        }

        thread::sleep(Duration::from_millis(50));
    }
}

fn spawn_stdin_channel() -> Receiver<String> {
    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || loop {
        let mut buffer = String::new();
        std::io::stdin().read_line(&mut buffer).unwrap();
        tx.send(buffer.trim_end().to_string()).unwrap();
    });
    rx
}
