//! Build-driver support: module discovery and dependency ordering.
//!
//! `build <dir>` scans for `.va` sources, reads each file's `(ns …)`
//! header and `(import …)` edges, and topologically sorts the graph so
//! the driver can elaborate each module after its dependencies and
//! hydrate importers from interface files.

mod error;
mod resolve;

pub use error::PkgError;
pub use resolve::{read_header, resolve_dir, ModuleSource, ResolvedGraph};
