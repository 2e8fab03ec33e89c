//! Sandbox execution engine for machine-generated interactive programs.
//!
//! A program arrives as source text on an `init` message, is vetted by the
//! [`validator`], rewritten by the [`transformer`], imported by the
//! [`loader`] and rendered by the [`lifecycle`] manager, which also applies
//! `params` updates in place. The [`host::Host`] trait is the only seam to
//! the environment actually running the code; see [`platform`].

pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod loader;
pub mod platform;
pub mod protocol;
pub mod source;
pub mod transformer;
pub mod validator;

pub use channel::{MessageChannel, MessageSender, message_channel};
pub use config::SandboxConfig;
pub use error::{ErrorKind, SandboxError, ValidationFailure};
pub use host::{Host, RenderContext, RenderOutput, Status};
pub use lifecycle::{Phase, Sandbox};
pub use protocol::{ControlDescriptor, InboundMessage, InitMessage, ParameterSet};
pub use transformer::{TransformedProgram, Transformer};
pub use validator::{ValidationVerdict, Validator};
