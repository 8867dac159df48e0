//! # lumen-core
//! Block types, the canonical codec, and the collaborator traits shared by
//! the Lumen cache, publisher and query surfaces.

pub mod codec;
pub mod constants;
pub mod error;
pub mod traits;
pub mod types;
