pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;
pub mod workflow;

pub use config::AppConfig;
pub use error::{BlogsmithError, Result};
pub use event::EventBus;
pub use types::*;
pub use workflow::{Route, Stage, StateUpdate, WorkflowState};
