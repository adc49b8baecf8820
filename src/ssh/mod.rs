//! SSH sessions: transport, authentication, shell channels and the
//! registry that owns them.

pub mod auth;
pub mod client;
pub mod cooldown;
pub mod cwd;
pub mod handler;
pub mod input;
pub mod registry;
pub mod session;
pub mod shell;
pub mod transport;

pub use auth::ResolvedAuth;
pub use client::{SshConnector, SshTransport};
pub use cooldown::ConnectCooldown;
pub use cwd::WorkingDirectory;
pub use registry::{
    ConnectOutcome, DisconnectOutcome, FilePicker, RegistryOptions, SessionRegistry,
};
pub use shell::{ShellChannel, ShellState};
pub use transport::{
    Connector, ExecOutput, PtyConfig, ShellCommand, ShellIo, ShellOutput, Transport,
};
