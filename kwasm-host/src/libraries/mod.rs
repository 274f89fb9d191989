//! Libraries shipped with the host.

pub mod objects;

pub use objects::{OBJECTS_LIBRARY, ObjectCommand, ObjectsLibrary};
