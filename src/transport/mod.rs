//! I/O collaborators of the multiplexers. The protocol code only sees these traits,
//! tests and custom transports can swap the native sockets out.
mod socket;
mod stream;

pub use socket::{DatagramSocket, NativeSocket, NetType};
pub use stream::{ConsoleListener, ConsoleStream};
