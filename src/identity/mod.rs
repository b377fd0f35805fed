/// Identity Resolution System
///
/// Reverse-resolves player DIDs to human-readable handles for view
/// hydration. Lookups go through a SQLite TTL cache backed by the PLC
/// directory (did:plc) or the domain's well-known document (did:web).
pub mod cache;
pub mod resolver;

pub use cache::HandleCache;
pub use resolver::{CachingResolver, DirectoryResolver, HandleResolver};

/// Placeholder handle for DIDs whose resolution fails, per the ATProto
/// convention. Views fall back to this rather than failing the request.
pub const INVALID_HANDLE: &str = "handle.invalid";
