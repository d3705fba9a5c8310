mod handshake;
mod helpers;
mod process;
mod transport;
mod worker;
