//! Conditional notification dispatch.
//!
//! An event carries an action code and the object it applies to. Threshold
//! rules configured for the code decide who is notified; the
//! [`DispatchEngine`] drives each matching rule through recipient
//! resolution, attachment lookup, composition, extension hooks, transport
//! and the delivery log.

pub mod attachment;
pub mod channels;
pub mod composer;
pub mod engine;
pub mod events;
pub mod hooks;
pub mod recipient;
pub mod rules;

pub use attachment::{ArtifactLayout, ArtifactStore, Attachment, AttachmentResolver, FsArtifactStore};
pub use channels::{ChannelConfig, NotificationChannel, OutgoingMail};
pub use composer::{ComposedMessage, MessageComposer};
pub use engine::{DispatchEngine, DispatchEngineBuilder, DispatchResult, EngineStats, RuleFailure};
pub use events::{EventObject, NotificationCodeInfo, NotificationEvent};
pub use hooks::{HookBus, HookOutcome, HookParameters, NotificationHook};
pub use recipient::{Recipient, RecipientResolver, Supervisor, SupervisorLookup};
pub use rules::{ConfigEntry, RuleEntry, RuleSet, ThresholdRule};
