//! # Custom Resource Definitions
//!
//! CRD types for the GitOps sync controller.
//!
//! ## Module Structure
//!
//! - `application.rs` - `Application` spec (source, destination, sync policy) and defaulting
//! - `status.rs` - Status types for tracking sync state and conditions
//! - `deploy_resource.rs` - `DeployResource` ownership records used for garbage collection

mod application;
mod deploy_resource;
mod status;

pub use application::{
    AppKey, Application, ApplicationSpec, Destination, GitToken, SecretKeyRef, Source, SourceType,
    SyncPolicy, TokenSource,
};
pub use deploy_resource::{deploy_resource_name, DeployResource, DeployResourceSpec};
pub use status::{
    set_condition, ApplicationStatus, Condition, SyncStatus, SyncStatusCode, CONDITION_READY,
    CONDITION_WEBHOOK_REGISTERED, REASON_MANUAL_REGISTRATION, REASON_NO_GIT_TOKEN,
};
