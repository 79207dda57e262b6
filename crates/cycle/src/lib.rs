//! Cooperative multi-phase frame scheduler.
//!
//! Entities register for one or more [`Phase`]s and the [`Scheduler`] runs one
//! dispatch loop per phase, invoking every live subscriber in registration
//! order each time the host signals that phase. A failing or panicking entity
//! is logged and isolated; dropped entities are purged lazily.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cadence_cycle::{Action, FrameDriver, Phase, Scheduler, SchedulerSpec};
//!
//! # async fn run() {
//! let driver = Arc::new(FrameDriver::new());
//! let scheduler = Scheduler::new(driver.clone(), SchedulerSpec::default());
//! let _listener = scheduler.add_listener(Action::timed(|dt| println!("update {dt}")), Phase::Update, true);
//! driver.frame(1.0 / 60.0, 1.0 / 50.0).await;
//! # }
//! ```

/// Callback adapter turning a closure into a schedulable entity.
pub mod action;
/// The schedulable capability and registration extension syntax.
pub mod entity;
/// Error and fault report types.
pub mod error;
/// Phase vocabulary and phase sets.
pub mod phase;
/// Scheduler, dispatch loops and status snapshots.
pub mod scheduler;
/// Host phase signal boundary and the in-process frame driver.
pub mod signal;
/// Scheduler configuration.
pub mod spec;

pub use action::{Action, LoopAction};
pub use entity::{AsEntity, EntityResult, ScheduleExt, Schedulable};
pub use error::{FaultKind, FaultReport, ScheduleError};
pub use phase::{Phase, PhaseSet};
pub use scheduler::{LoopExit, PauseEvent, PhaseRecord, Scheduler, WeakScheduler};
pub use signal::{FrameDriver, PhaseSignal, Wake};
pub use spec::{DEFAULT_TICK_INTERVAL, SchedulerSpec, TickSource};
