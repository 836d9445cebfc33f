//! Recovery state machine: `WaitingConnections -> Replaying -> Running`.

mod manager;
mod replaying;
mod subpartition_thread;

pub use manager::RecoveryManager;
pub use replaying::ReplayingState;
pub use subpartition_thread::SubpartitionRecoveryThread;
