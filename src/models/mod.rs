//! Domain model module declarations.

pub mod job;
pub mod marker;
pub mod session;
pub mod summary;
