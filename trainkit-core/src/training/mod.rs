//! Training orchestration: model seam, freezing, callbacks, schedules and the fit loop.

pub mod callbacks;
pub mod checkpoint;
pub mod compile;
pub mod enqueuer;
pub mod fit;
pub mod freeze;
pub mod logger;
pub mod metrics;
pub mod model;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod timing;

pub use callbacks::{
    CallbackAction, EarlyStopping, ModelCheckpoint, TrainingCallback, WarmupCosineScheduler,
};
pub use checkpoint::{Checkpoint, CheckpointManifest};
pub use compile::{Monitor, Optimizer};
pub use fit::{FitOutcome, FitParams};
pub use logger::RunLogger;
pub use metrics::{EpochLogs, History, MetricSpec, MonitorMode};
pub use model::{BatchGenerator, Layer, Model};
pub use runner::{TrainOutput, interrupt_on_ctrl_c, train};
pub use scheduler::WarmupCosineSchedule;
pub use session::{SessionStatus, TrainingSession};
