pub mod access_token;
pub mod audit_log;
pub mod consent;
pub mod job_execution;
pub mod profile_attribute;
pub mod user;

pub use access_token::Entity as AccessToken;
pub use audit_log::Entity as AuditLog;
pub use consent::Entity as Consent;
pub use job_execution::Entity as JobExecution;
pub use profile_attribute::Entity as ProfileAttribute;
pub use user::Entity as User;
