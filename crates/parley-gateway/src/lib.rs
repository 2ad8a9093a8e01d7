pub mod connection;
pub mod dispatcher;
pub mod registry;

pub use connection::run_connection;
pub use dispatcher::{Dispatcher, GatewayConfig};
