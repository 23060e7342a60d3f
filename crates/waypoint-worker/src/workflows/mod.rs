//! Application workflows hosted by the worker

mod classify_docs;
mod file_upload;
mod user_signup;

pub use classify_docs::{ClassifyDocs, CloseStreams, WriteProgress, PROGRESS};
pub use file_upload::{FileUpload, FileUploadOutput};
pub use user_signup::{SignupResult, UserSignup, ONBOARDING_DELAY};
