//! Monitoring orchestration
//!
//! [`MonitorLoop`] owns every piece of mutable monitoring state and runs the
//! cycle on a timer. [`MonitorHandle`] is the narrow read-only view handed to
//! the query surface.

mod handle;
mod r#loop;


pub use handle::{CycleBundle, LatestResults, MonitorHandle, MonitorStatus};
pub use r#loop::{MonitorLoop, MonitorLoopBuilder};
