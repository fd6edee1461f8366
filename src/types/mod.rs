//! Wire and domain types shared across the SDK.

pub mod preferences;
pub mod response;

pub use preferences::{
    Category, CategoryChannel, CategoryPatch, ChannelLevelPreferenceOptions, ChannelPreference,
    PreferenceData, PreferenceOptions, Section,
};
pub use response::{ApiErrorBody, ApiResponse, ResponseStatus};
