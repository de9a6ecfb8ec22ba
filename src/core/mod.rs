pub mod etl;
pub mod flatten;
pub mod stage;

pub use crate::domain::model::{Decomposition, FlatRecord};
pub use crate::domain::ports::{ConfigProvider, RecordSink, Transform};
pub use crate::utils::error::Result;
