//! Session intake, orchestration, and the WebSocket edge.

pub mod intake;
pub mod session;
pub mod transport;
pub mod tunnel;
pub mod ws;

pub use intake::{Intake, IntakeStats};
pub use transport::{ClientSink, ClientSource};
pub use tunnel::{Phase, SessionState};
pub use ws::{router, GatewayState, WsSink, WsSource};
