pub mod btle;
pub mod constants;
pub mod events;
pub mod handshake;
pub mod protocol;
pub mod scanner;
pub mod session;
pub mod transport;
pub mod types;
pub mod uuids;

#[cfg(test)]
pub(crate) mod fake;
