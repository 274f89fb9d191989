//! kwasm core library.
//!
//! Foundational types for the kwasm host bridge, independent of any
//! particular Wasm engine.
//!
//! # Key Components
//!
//! - **Error**: [`KwasmError`] with stable codes for every bridge failure
//! - **Value**: [`HostValue`], the shapes a host value can take
//! - **Objects**: [`ObjectTable`], handle allocation with generation checks
//! - **Protocol**: envelopes, the control command table and worker launch records
//!
//! # Example
//!
//! ```
//! use kwasm_core::prelude::*;
//!
//! let mut table = ObjectTable::new(HostValue::Null);
//! let handle = table.insert(HostValue::string("hello")).unwrap();
//! assert_eq!(table.get(handle).unwrap().as_str(), Some("hello"));
//! table.release(handle);
//! assert!(table.get(handle).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod objects;
pub mod prelude;
pub mod protocol;
pub mod value;

pub use error::{KwasmError, Result};
pub use objects::{GLOBAL_HANDLE, NULL_HANDLE, ObjectTable};
pub use protocol::{ControlCommand, Envelope, WorkerLaunch};
pub use value::{HostFunction, HostObject, HostValue};
