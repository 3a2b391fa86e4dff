//! Core orchestration - event bus, cooperative scheduling, state machine

mod event_bus;
mod scheduler;
mod state_machine;

pub use event_bus::{Command, Confirmation, EngineEvent, EventBus};
pub use scheduler::{spawn_worker, StopToken, WorkerHandle};
pub use state_machine::{MachineState, Mode, StateMachine};
