pub mod plan;
pub mod preload;
pub mod write;

pub use plan::{FkBinding, LinkStep, NodeMode, Omit, WriteNode, WritePlan, WriteStep, order_for_write};
pub use preload::{Preload, expand_for_read};
pub use write::execute_plan;
