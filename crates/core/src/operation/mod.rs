//! Operation model shared by the executor, scheduler and editor.
//!
//! An operation is one user-requested edit (trim, rotate, merge or
//! trim+rotate) tracked from submission to a terminal state. This module
//! holds the record and its state machine, the error taxonomy, the
//! submission request, the cooperative stop signal and the listener
//! surface used to report progress and outcomes.

mod error;
mod listener;
mod request;
mod signal;
mod types;

pub use error::{ErrorKind, OperationError};
pub use listener::{
    ChannelListener, EventStream, NoopListener, OperationEvent, OperationListener,
    ProgressUpdate, Reporter,
};
pub use request::EditRequest;
pub use signal::{StopReason, StopSignal};
pub use types::{OperationId, OperationKind, OperationPriority, OperationRecord, OperationState};
