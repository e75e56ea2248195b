pub mod entity;
pub mod record;
pub mod row_mapper;

pub use entity::Entity;
pub use record::{Record, RelationValue, records_of};
pub use row_mapper::{RowMapper, WriteMode};
