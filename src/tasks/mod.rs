//! Background Tasks
//!
//! Long-running tasks spawned by a map instance and aborted on shutdown.

mod write_behind;

pub use write_behind::{spawn_write_behind_task, WriteBehindOp, WriteBehindQueue};
