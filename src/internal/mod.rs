//! Internal domain model: objects, the object database, refs, the
//! repository façade, configuration and the revision resolver.

pub mod config;
pub mod object;
pub mod odb;
pub mod refs;
pub mod repository;
pub mod revision;
pub mod zlib;
