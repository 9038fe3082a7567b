pub mod result_set;
pub mod row;

pub use result_set::ResultSet;
pub use row::{Columns, CustomDbRow};
