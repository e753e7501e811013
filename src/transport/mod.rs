pub mod channel;
pub mod messages;
pub mod websocket;

pub use channel::{Connector, LinkEvent, Outbound, TransportChannel, TransportEvent};
pub use messages::ControlMessage;
pub use websocket::WebSocketConnector;
