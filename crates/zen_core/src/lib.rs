pub mod gemini;
pub mod habit;
pub mod model;
pub mod plan;
pub mod storage;
pub mod store;

pub use crate::plan::{PlanClient, PlanError, PlanRequest, PlanResponse};
pub use crate::store::{Mutation, PlannerStore, PlannerStoreBuilder};
