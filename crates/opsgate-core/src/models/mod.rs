pub mod action;
pub mod error;
pub mod run;
pub mod status;

pub use action::{ActionId, ProjectId};
pub use error::{CoreError, CoreErrorKind, CoreResult};
pub use run::{RunId, RunRecord, RunStatus};
pub use status::{CanonicalStatus, ResolvedStatus};
