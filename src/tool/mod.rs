//! External tool plumbing: templates, provisioning and invocation

pub mod command;
pub mod invoker;
pub mod provision;

pub use command::{CommandTemplate, TemplateError, TemplateVars, ToolCommand, PLACEHOLDERS};
pub use invoker::{ExitOutcome, InvokeError, ToolInvoker, EXIT_CODE_NOT_FOUND};
pub use provision::{InstallError, NoInstaller, ProvisionError, ToolInstaller, ToolProvisioner};
