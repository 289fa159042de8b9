pub mod decision;
pub mod etl;
pub mod extraction;
pub mod prompts;
pub mod response;
pub mod retry;
pub mod ris;
pub mod screening;
pub mod table;
pub mod usage;

#[cfg(test)]
pub mod testing;

pub use crate::domain::model::{Record, StageOutput, Table};
pub use crate::domain::ports::{LlmClient, Pipeline, Storage};
pub use crate::utils::error::Result;
