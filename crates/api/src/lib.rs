//! The public, ergonomic surface of VeloxDB (§6, §9, §10.1, §10.5).
//!
//! `velox-engine::Database` is already a complete embeddable handle; this
//! crate adds two things on top of it:
//!
//! - [`EngineHandle`]: a thin facade for callers that want an implicit
//!   default rather than threading a `&Database` explicitly (§9: "give the
//!   engine an explicit context parameter; allow a thin facade for callers
//!   that want an implicit default").
//! - [`control`]: the engine control surface consumed by an administrative
//!   collaborator (CLI, admin RPC service) — create-log, update-assemblies,
//!   status, create-snapshot, rewind, fail-over. Every operation returns a
//!   structured, serializable status object rather than a bare `()` or
//!   string, so a caller across a process boundary can render it without
//!   re-deriving state from logs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
mod handle;

pub use handle::EngineHandle;
