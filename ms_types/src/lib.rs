//! ms_types
//!
//! Shared value types for the msflow pipeline: the sample key that travels
//! through every queue and ledger, the human-facing status strings, and the
//! line codec used by the queue files.

// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms
)]
#![warn(unused)]

pub mod identity;
pub mod record;
pub mod status;

pub use identity::{SampleIdentity, SampleKey, SchemaProfile};
pub use record::{RecordError, RecordFormat};
pub use status::{SampleStatus, SearchEngine};
