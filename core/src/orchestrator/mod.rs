//! 实时通话编排的基础类型、外部接口与运行时组件。

mod constants;

pub mod config;
pub mod runtime;
pub mod traits;
pub mod types;

pub use config::{OrchestratorConfig, ProvisioningConfig};
pub use runtime::{ActiveCall, DurationTimer};
pub use traits::{CallProvisioner, RemoteSession, RemoteSessionFactory, RemoteSessionParts};
pub use types::{
    CallHandle, CallParams, RemoteSessionEvent, Speaker, TranscriptEntry, Utterance,
};
