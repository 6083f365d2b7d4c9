//! Profile-driven bidirectional file synchronization.
//!
//! A run walks both endpoints of a profile into a [`common::entry`]
//! snapshot, classifies every path against the last-known state into an
//! [`common::operation::Operation`], applies the plan, and persists the
//! updated state — see [`coordinator`] for the per-run pipeline and
//! [`scheduler`] for the long-running daemon loop that drives it.
//!
//! ```text
//! profile_loader -> snapshot -> planner -> executor -> state
//!                        \\_____ coordinator ties these together ______/
//!                                       \\_ scheduler runs it on a timer _/
//! ```

pub mod coordinator;
pub mod executor;
pub mod logging;
pub mod merge;
pub mod planner;
pub mod profile_loader;
pub mod scheduler;
pub mod snapshot;
pub mod state;
