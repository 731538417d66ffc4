//! Source corpus discovery
//!
//! Finds media and documents under the corpus root and registers the ones the
//! status store has not seen yet.

mod discovery;

pub use discovery::{CorpusScanner, DiscoveredFile, MediaKind, ScanReport};
