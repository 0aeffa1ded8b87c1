use chunknet::{ConsoleConfig, NetConsole};
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

// Connect with `telnet 127.0.0.1 [PORT]` or `nc 127.0.0.1 [PORT]`.
fn main() {
    env_logger::init();
    println!("Usage: console [PORT]");
    let args: Vec<String> = std::env::args().collect();
    let addr: SocketAddr = format!("127.0.0.1:{}", args[1]).parse().unwrap();

    let mut console = NetConsole::open(addr, ConsoleConfig::default()).unwrap();
    console.set_callbacks(
        |client_id, addr| println!("Console client {} connected from {}.", client_id, addr),
        |client_id, reason| println!("Console client {} left: {}", client_id, reason),
    );

    loop {
        console.update().unwrap();

        while let Some((client_id, line)) = console.recv() {
            println!("Console client {} sent {:?}.", client_id, line);
            let result = match line.as_str() {
                "quit" => console.drop_client(client_id, "bye"),
                _ => console.send(client_id, &format!("echo: {}", line)),
            };
            if let Err(e) = result {
                println!("Console client {}: {}", client_id, e);
            }
        }

        thread::sleep(Duration::from_millis(50));
    }
}
