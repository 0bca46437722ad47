pub(crate) mod access_log;
pub mod capture;
pub mod connection;
pub mod connector;
pub mod direction;
mod endpoint;
pub mod relay;
pub(crate) mod stream;
mod utils;

pub use endpoint::Tunnel;
