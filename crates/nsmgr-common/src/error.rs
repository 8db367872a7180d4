//! Error types for nsmgr operations.
//!
//! Every manager operation reports at most one error, drawn from a small
//! taxonomy (see [`ErrorKind`]):
//!
//! - validation: a required argument was empty, nothing was probed or changed
//! - precondition: a namespace, interface or bridge the operation depends on is missing
//! - not found: the subject of a delete does not exist
//! - operation: the control interface returned a non-zero exit status
//!
//! Each variant also carries a stable [`CfgMgrError::code`] so callers can
//! tell apart, for example, a missing bridge from a missing member interface.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for nsmgr operations.
pub type CfgMgrResult<T> = Result<T, CfgMgrError>;

/// Coarse classification of a [`CfgMgrError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required argument was empty.
    Validation,
    /// A dependency of the operation does not exist.
    Precondition,
    /// The subject of a delete does not exist.
    NotFound,
    /// The control interface call failed.
    Operation,
    /// The configuration document is unusable.
    Config,
}

impl ErrorKind {
    /// Returns the kind name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Precondition => "PreconditionError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Operation => "OperationError",
            ErrorKind::Config => "ConfigError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Required argument names, one validation code each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Namespace, interface, bridge or veth host end name.
    Name,
    /// Target namespace of a move.
    Namespace,
    /// Interface an operation acts on.
    Interface,
    /// Bridge an interface is attached to.
    Bridge,
    /// Veth peer end name.
    Peer,
    /// IP address.
    Address,
    /// Address prefix length.
    PrefixLen,
    /// Parameter value (MTU, queue length, free-form options).
    Value,
    /// Route or rule destination.
    To,
    /// Route gateway.
    Via,
    /// Route output device.
    Dev,
    /// Routing table.
    Table,
}

impl Field {
    /// Returns the argument name as it appears in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Namespace => "namespace",
            Field::Interface => "interface",
            Field::Bridge => "bridge",
            Field::Peer => "peer",
            Field::Address => "address",
            Field::PrefixLen => "prefix length",
            Field::Value => "value",
            Field::To => "to",
            Field::Via => "via",
            Field::Dev => "dev",
            Field::Table => "table",
        }
    }

    /// Returns the validation error code for this argument.
    pub fn code(&self) -> &'static str {
        match self {
            Field::Name => "missing_name",
            Field::Namespace => "missing_namespace",
            Field::Interface => "missing_interface",
            Field::Bridge => "missing_bridge",
            Field::Peer => "missing_peer",
            Field::Address => "missing_address",
            Field::PrefixLen => "missing_prefix_length",
            Field::Value => "missing_value",
            Field::To => "missing_to",
            Field::Via => "missing_via",
            Field::Dev => "missing_dev",
            Field::Table => "missing_table",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel objects an operation can depend on or act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    /// A network namespace.
    Namespace,
    /// The namespace holding a veth host end.
    HostNamespace,
    /// The namespace a veth peer end is moved into.
    PeerNamespace,
    /// A network interface.
    Interface,
    /// A bridge device.
    Bridge,
}

impl Entity {
    /// Returns the entity name as it appears in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Namespace => "Namespace",
            Entity::HostNamespace => "Host namespace",
            Entity::PeerNamespace => "Peer namespace",
            Entity::Interface => "Interface",
            Entity::Bridge => "Bridge",
        }
    }

    fn missing_code(&self) -> &'static str {
        match self {
            Entity::Namespace => "namespace_missing",
            Entity::HostNamespace => "host_namespace_missing",
            Entity::PeerNamespace => "peer_namespace_missing",
            Entity::Interface => "interface_missing",
            Entity::Bridge => "bridge_missing",
        }
    }

    fn not_found_code(&self) -> &'static str {
        match self {
            Entity::Namespace | Entity::HostNamespace | Entity::PeerNamespace => {
                "namespace_not_found"
            }
            Entity::Interface => "interface_not_found",
            Entity::Bridge => "bridge_not_found",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during nsmgr operations.
#[derive(Debug, Error)]
pub enum CfgMgrError {
    /// A required argument was empty.
    #[error("{operation}: missing required argument '{field}'")]
    Validation {
        /// The operation that rejected its arguments (e.g., "route add").
        operation: &'static str,
        /// The empty argument.
        field: Field,
    },

    /// An argument was present but could not be understood.
    #[error("{operation}: invalid {field} '{keyword}': {message}")]
    InvalidArgument {
        /// The operation that rejected its arguments.
        operation: &'static str,
        /// The malformed argument.
        field: Field,
        /// Offending keyword within the argument.
        keyword: String,
        /// What was wrong with it.
        message: String,
    },

    /// A namespace, interface or bridge the operation depends on is missing.
    #[error("{entity} '{name}' does not exist")]
    Precondition {
        /// What is missing.
        entity: Entity,
        /// Its name (qualified with the namespace where relevant).
        name: String,
    },

    /// A device of another kind already holds the name.
    #[error("'{name}' already exists as a {kind} device")]
    NameTaken {
        /// The device name (qualified with its namespace).
        name: String,
        /// Kind of the existing device.
        kind: String,
    },

    /// A namespace cannot be deleted while interfaces remain in it.
    #[error("Namespace '{namespace}' still has interfaces assigned: {}", interfaces.join(", "))]
    NamespaceBusy {
        /// The namespace.
        namespace: String,
        /// Interfaces still assigned (loopback excluded).
        interfaces: Vec<String>,
    },

    /// The subject of a delete does not exist.
    #[error("{entity} '{name}' not found")]
    NotFound {
        /// What was looked up.
        entity: Entity,
        /// Its name.
        name: String,
    },

    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Structured output of a query could not be decoded.
    #[error("Cannot parse output of '{command}': {message}")]
    Parse {
        /// The query command.
        command: String,
        /// Decoder message.
        message: String,
    },

    /// One or more bridge members could not be detached.
    #[error("Failed to detach {} member(s) from bridge '{bridge}': {}", failed.len(), failed.join(", "))]
    MembersDetachFailed {
        /// The bridge.
        bridge: String,
        /// Members left attached.
        failed: Vec<String>,
    },

    /// Bridge delete stopped because its members could not all be detached.
    #[error("Cannot delete bridge '{bridge}': {source}")]
    BridgeMembers {
        /// The bridge.
        bridge: String,
        /// The detach failure.
        #[source]
        source: Box<CfgMgrError>,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl CfgMgrError {
    /// Creates a validation error.
    pub fn missing(operation: &'static str, field: Field) -> Self {
        Self::Validation { operation, field }
    }

    /// Creates a validation error for a malformed argument.
    pub fn invalid_argument(
        operation: &'static str,
        field: Field,
        keyword: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidArgument {
            operation,
            field,
            keyword: keyword.into(),
            message: message.into(),
        }
    }

    /// Creates a precondition error.
    pub fn precondition(entity: Entity, name: impl Into<String>) -> Self {
        Self::Precondition {
            entity,
            name: name.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(entity: Entity, name: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            name: name.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Fails with a validation error when `value` is empty.
    pub fn require(operation: &'static str, field: Field, value: &str) -> CfgMgrResult<()> {
        if value.is_empty() {
            Err(Self::missing(operation, field))
        } else {
            Ok(())
        }
    }

    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CfgMgrError::Validation { .. } | CfgMgrError::InvalidArgument { .. } => {
                ErrorKind::Validation
            }
            CfgMgrError::Precondition { .. }
            | CfgMgrError::NameTaken { .. }
            | CfgMgrError::NamespaceBusy { .. } => ErrorKind::Precondition,
            CfgMgrError::NotFound { .. } => ErrorKind::NotFound,
            CfgMgrError::ShellExec { .. }
            | CfgMgrError::ShellCommandFailed { .. }
            | CfgMgrError::Parse { .. }
            | CfgMgrError::MembersDetachFailed { .. }
            | CfgMgrError::BridgeMembers { .. } => ErrorKind::Operation,
            CfgMgrError::InvalidConfig { .. } => ErrorKind::Config,
        }
    }

    /// Returns a stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CfgMgrError::Validation { field, .. } => field.code(),
            CfgMgrError::InvalidArgument { .. } => "invalid_argument",
            CfgMgrError::Precondition { entity, .. } => entity.missing_code(),
            CfgMgrError::NameTaken { .. } => "name_taken",
            CfgMgrError::NamespaceBusy { .. } => "namespace_busy",
            CfgMgrError::NotFound { entity, .. } => entity.not_found_code(),
            CfgMgrError::ShellExec { .. } => "exec_failed",
            CfgMgrError::ShellCommandFailed { .. } => "command_failed",
            CfgMgrError::Parse { .. } => "unparsable_output",
            CfgMgrError::MembersDetachFailed { .. } => "member_detach_failed",
            CfgMgrError::BridgeMembers { .. } => "bridge_members_remain",
            CfgMgrError::InvalidConfig { .. } => "invalid_config",
        }
    }
}
