pub mod cache;
pub mod cancel;
pub mod error;
pub mod graph;
pub mod symbol;

// Re-export commonly used types
pub use cache::{CacheStats, LruCache};
pub use cancel::CancelToken;
pub use error::AnalyticsError;
pub use graph::{GraphBuilder, SymbolGraph};
pub use symbol::{EdgeKind, EdgeRecord, LineRange, Location, Symbol, SymbolKind};
