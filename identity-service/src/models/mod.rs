pub mod auth_process;
pub mod auth_schema;
pub mod context;
pub mod refresh_token;

pub use auth_process::{AuthProcess, ProcessStatus, StatusHistoryEntry, Step};
pub use auth_schema::{
    AdmissionRule, AuthMethod, AuthSchema, CheckCode, Condition, MethodPolicy, SchemaCode,
    SchemaNode,
};
pub use context::{AppHeaders, UserInfo, VerifiedIdentity};
pub use refresh_token::{AuthEntryPoint, RefreshToken, SessionType};
