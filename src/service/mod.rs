pub mod chat_service;
pub mod health_monitor;
pub mod model_service;
pub mod session_service;

pub use chat_service::{ChatService, StopHandle, TurnOutcome};
pub use health_monitor::HealthMonitor;
pub use model_service::{ModelService, PullOutcome};
pub use session_service::SessionService;
