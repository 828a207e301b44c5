//! Internal utility helpers: expiring cache, debounce, cache paths, query escaping, serde shapes.

pub(crate) mod cache;
pub(crate) mod debounce;
pub(crate) mod paths;
pub(crate) mod query;
pub(crate) mod serde;
