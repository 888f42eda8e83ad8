pub mod batch;
pub mod queries;
pub mod soql;

pub use crate::domain::model::{Record, Table};
pub use crate::domain::ports::CrmApi;
pub use crate::utils::error::Result;
pub use batch::{BatchAction, BatchOutcome, BatchReport, BatchRunner, ItemOutcome, RetryPolicy};
