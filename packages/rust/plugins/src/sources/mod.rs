//! Source plugins: the first stage of a pipeline.

pub mod confluence;
pub mod empty;
pub mod git;
pub mod googledrive;
pub mod local;

pub use confluence::{ConfluenceParams, ConfluenceSource};
pub use empty::EmptySource;
pub use git::{GitParams, GitSource, parse_repo_url};
pub use googledrive::{DriveParams, GoogleDriveSource};
pub use local::{LocalParams, LocalSource};
