pub mod dispatch;
pub mod health_check;
pub mod openai_compat;
pub mod routing;

pub use dispatch::{DispatchAttempt, DispatchOutcome, DispatchRequest, Dispatcher};
pub use health_check::{HealthProbe, ProbeBoard, ProbeResult};
pub use openai_compat::OpenAICompatExecutor;
