//! `kwasm.objects`: create, inspect and call host values from the guest.
//!
//! Everything here works on the calling context's object table. Handles are
//! the guest's only view of host values; results that are null come back as
//! handle 0 rather than a fresh slot.

use crate::context::{GuestCall, decode_text};
use crate::library::HostLibrary;
use kwasm_core::error::{KwasmError, Result};
use kwasm_core::objects::{NULL_HANDLE, ObjectTable};
use kwasm_core::protocol::{decode_exact, decode_words};
use kwasm_core::value::HostValue;

/// Catalog name of the objects library.
pub const OBJECTS_LIBRARY: &str = "kwasm.objects";

/// Commands of the objects library.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectCommand {
    /// Payload is UTF-8 text; returns a handle to a new string.
    NewString = 0,
    /// Payload is one handle; releases it and returns 0.
    Release = 1,
    /// Payload is `[function, this, args...]`; returns a handle to the result.
    Call = 2,
    /// Payload is one handle; writes its text into the guest and returns the
    /// byte length.
    ReadString = 3,
    /// Payload is one handle; returns its numeric value as `u32`.
    NumberValue = 4,
    /// Payload is raw bytes; returns a handle to a new bytes value.
    NewBytes = 5,
    /// Payload is `[object handle, name bytes...]`; returns a handle to the
    /// property value.
    GetNamed = 6,
}

impl TryFrom<u32> for ObjectCommand {
    type Error = KwasmError;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            0 => Self::NewString,
            1 => Self::Release,
            2 => Self::Call,
            3 => Self::ReadString,
            4 => Self::NumberValue,
            5 => Self::NewBytes,
            6 => Self::GetNamed,
            command => {
                return Err(KwasmError::UnknownCommand {
                    library_id: 0,
                    command,
                });
            }
        })
    }
}

/// Store `value`, mapping null to handle 0.
fn store(objects: &mut ObjectTable, value: HostValue) -> Result<u32> {
    if value.is_null() {
        Ok(NULL_HANDLE)
    } else {
        objects.insert(value)
    }
}

/// Read property `name` of the value behind `object`.
///
/// A missing property, or a value without properties, yields handle 0.
pub(crate) fn read_property(objects: &mut ObjectTable, object: u32, name: &str) -> Result<u32> {
    match objects.get(object)?.property(name) {
        Some(value) => store(objects, value),
        None => Ok(NULL_HANDLE),
    }
}

/// The built-in objects library.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectsLibrary;

impl HostLibrary for ObjectsLibrary {
    fn name(&self) -> &str {
        OBJECTS_LIBRARY
    }

    fn dispatch(&self, call: &mut GuestCall<'_, '_>, command: u32, data: &[u8]) -> Result<u32> {
        match ObjectCommand::try_from(command)? {
            ObjectCommand::NewString => {
                let text = decode_text(data, 0)?;
                call.insert(HostValue::string(text))
            }
            ObjectCommand::Release => {
                let [handle] = decode_exact::<1>(data, "release")?;
                if call.release(handle).is_none() {
                    tracing::debug!(context = call.context_id(), handle, "release of dead handle");
                }
                Ok(0)
            }
            ObjectCommand::Call => {
                let words = decode_words(data, "call")?;
                let [function, this, args @ ..] = words.as_slice() else {
                    return Err(KwasmError::MalformedPayload {
                        what: "call",
                        expected: 8,
                        actual: data.len(),
                    });
                };
                let target = call.object(*function)?.clone();
                let this = call.object(*this)?.clone();
                let args = args
                    .iter()
                    .map(|handle| call.object(*handle).cloned())
                    .collect::<Result<Vec<_>>>()?;
                let result = target.call(&this, &args).ok_or(KwasmError::TypeMismatch {
                    handle: *function,
                    expected: "function",
                    found: target.kind(),
                })?;
                store(call.objects_mut(), result)
            }
            ObjectCommand::ReadString => {
                let [handle] = decode_exact::<1>(data, "read string")?;
                let text = call.object(handle)?.to_text();
                let ptr = call.write_string(&text)?;
                Ok(ptr.size)
            }
            ObjectCommand::NumberValue => {
                let [handle] = decode_exact::<1>(data, "number value")?;
                let value = call.object(handle)?;
                value.as_u32().ok_or(KwasmError::TypeMismatch {
                    handle,
                    expected: "number",
                    found: value.kind(),
                })
            }
            ObjectCommand::NewBytes => call.insert(HostValue::Bytes(data.to_vec())),
            ObjectCommand::GetNamed => {
                if data.len() < 4 {
                    return Err(KwasmError::MalformedPayload {
                        what: "named property lookup",
                        expected: 4,
                        actual: data.len(),
                    });
                }
                let (head, name) = data.split_at(4);
                let [object] = decode_exact::<1>(head, "named property lookup")?;
                let name = decode_text(name, 4)?;
                read_property(call.objects_mut(), object, name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kwasm_core::value::HostObject;

    #[test]
    fn command_numbers() {
        assert_eq!(ObjectCommand::try_from(0).unwrap(), ObjectCommand::NewString);
        assert_eq!(ObjectCommand::try_from(6).unwrap(), ObjectCommand::GetNamed);
        assert!(ObjectCommand::try_from(7).is_err());
    }

    #[test]
    fn property_reads() {
        let global = HostObject::new()
            .with("name", "host")
            .with("nothing", HostValue::Null);
        let mut table = ObjectTable::new(HostValue::Object(global));

        let h = read_property(&mut table, 1, "name").unwrap();
        assert_eq!(table.get(h).unwrap(), &HostValue::string("host"));

        assert_eq!(read_property(&mut table, 1, "missing").unwrap(), NULL_HANDLE);
        assert_eq!(read_property(&mut table, 1, "nothing").unwrap(), NULL_HANDLE);
        assert_eq!(read_property(&mut table, 0, "name").unwrap(), NULL_HANDLE);

        let len = read_property(&mut table, h, "length").unwrap();
        assert_eq!(table.get(len).unwrap().as_u32(), Some(4));

        assert!(matches!(
            read_property(&mut table, 77, "name"),
            Err(KwasmError::InvalidHandle { handle: 77 })
        ));
    }
}
