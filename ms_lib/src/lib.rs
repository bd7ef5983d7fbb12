//! ms_lib
//!
//! The msflow pipeline stages. Every stage is a short-lived invocation that
//! cooperates with its siblings only through the queue files, the imported
//! ledger and the status board:
//!
//! import → conversion queue → convert → search queues → tandem, mascot →
//! aggregate

// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms
)]
#![warn(unused)]

pub mod aggregate;
pub mod context;
pub mod convert;
pub mod import;
pub mod layout;
pub mod mascot;
pub mod prefs;
pub mod project_log;
pub mod stage;
pub mod tandem;
pub mod template;
pub mod testing;
pub mod tools;

pub use aggregate::{run_aggregate, AggregateReport};
pub use context::PipelineContext;
pub use convert::ConvertStage;
pub use import::{run_import, ImportReport};
pub use mascot::MascotStage;
pub use prefs::refresh_prefs;
pub use stage::{run_queue_stage, QueueStage, StageOutcome};
pub use tandem::TandemStage;
