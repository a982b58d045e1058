pub mod authenticate;
pub mod connection;

pub use authenticate::authenticate;
pub use connection::{connect, connection_status, disconnect, send_audio};
