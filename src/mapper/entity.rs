use super::record::Record;
use crate::core::Result;
use crate::schema::EntityDescriptor;

/// A Rust type persisted through the registry.
///
/// `describe` is called once, at registration. `to_record` includes the
/// relations the caller attached; `from_record` reads back whatever was
/// loaded, leaving unloaded relations empty.
pub trait Entity: Send + Sync + Sized + 'static {
    fn describe() -> EntityDescriptor;

    fn to_record(&self) -> Record;

    fn from_record(record: Record) -> Result<Self>;
}
