//! beacon_sdk: client SDK for the Beacon collector.
//!
//! The crate covers four concerns around one context object:
//!
//! - **client**: user identification, session lifecycle, token refresh, and
//!   event tracking ([`BeaconClient`]).
//! - **preferences**: an optimistic local mirror of the notification
//!   preference tree with debounced remote persistence ([`Preferences`]).
//! - **push**: web-push subscription lifecycle over a host-provided bridge
//!   ([`WebPush`], [`PushBridge`]).
//! - **worker**: the isolated display context that sanitizes incoming push
//!   payloads and reports delivery events ([`worker`]).

pub mod client;
pub mod debounce;
pub mod error;
pub mod events;
pub mod network;
pub mod preferences;
pub mod push;
pub mod storage;
pub mod transport;
pub mod types;
pub mod user;
mod utils;
pub mod worker;

// Top-level re-exports for common usage
pub use crate::client::{
    BeaconClient, ClientConfig, ClientOptions, IdentifyOptions, RefreshTokenCallback, ResetOptions,
};
pub use crate::error::{BeaconError, ErrorType, Result};
pub use crate::events::{EventBus, SdkEvent, SubscriptionId};
pub use crate::network::{HttpRequest, HttpResponse, NativeNetwork, Network};
pub use crate::preferences::{CategoryListArgs, PreferenceArgs, Preferences};
pub use crate::push::{PushBridge, PushPermission, WebPush};
pub use crate::storage::{MemoryStorage, Storage};
pub use crate::types::{
    ApiResponse, Category, CategoryChannel, ChannelLevelPreferenceOptions, ChannelPreference,
    PreferenceData, PreferenceOptions, ResponseStatus, Section,
};
pub use crate::user::User;
