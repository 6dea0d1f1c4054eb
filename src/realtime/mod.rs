pub mod safe_copy;
pub mod websocket;

pub use safe_copy::safe_alert;
pub use websocket::{handle_socket, ClientId, ClientMessage, RealtimeHub, WsMessage, ALERT_PATTERNS_CHANNEL};
