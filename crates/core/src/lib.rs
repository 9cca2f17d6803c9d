pub mod config;
pub mod editor;
pub mod executor;
pub mod metrics;
pub mod monitor;
pub mod operation;
pub mod scheduler;
pub mod testing;
pub mod transcoder;

pub use config::{
    load_config, load_config_from_str, load_config_or_default, validate_config, Config,
    ConfigError, MemoryConfig, OutputConfig,
};
pub use editor::{OperationStatus, OperationTracker, OperationView, VideoEditor};
pub use executor::{OperationExecutor, OperationHandle};
pub use monitor::{MemoryProbe, SystemMemoryProbe};
pub use operation::{
    ChannelListener, EditRequest, ErrorKind, EventStream, OperationError, OperationEvent,
    OperationId, OperationKind, OperationListener, OperationPriority, OperationRecord,
    OperationState, ProgressUpdate,
};
pub use scheduler::{OperationScheduler, SchedulerStatus};
pub use transcoder::{FfmpegTranscoder, Transcoder, TranscoderError};
