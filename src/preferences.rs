//! The preference engine: an optimistic local mirror of the collector's
//! preference tree.
//!
//! Mutations apply to the mirror immediately so a UI stays responsive, then a
//! per-key debounced PATCH persists the final state of a toggle burst. The
//! authoritative merge happens when the response lands: server-returned
//! fields overwrite the live node field-by-field (last write wins), and
//! observers hear [`SdkEvent::PreferencesUpdated`] or
//! [`SdkEvent::PreferencesError`].
//!
//! Every scheduled update captures the tree's generation counter; a
//! reconciliation whose generation no longer matches (the tree was replaced
//! by a re-fetch, or torn down by reset) is dropped instead of writing into
//! state it no longer owns.

use crate::client::ClientCore;
use crate::debounce::KeyedDebouncer;
use crate::events::SdkEvent;
use crate::types::{
    ApiResponse, Category, CategoryPatch, ChannelLevelPreferenceOptions, PreferenceData,
    PreferenceOptions,
};
use crate::utils::{build_query, subscriber_path};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const FETCH_FIRST: &str = "call fetch_preferences method before performing action";

/// Scoping arguments shared by preference queries and updates.
#[derive(Clone, Debug)]
pub struct PreferenceArgs {
    pub tenant_id: Option<String>,
    pub show_opt_out_channels: bool,
}

impl Default for PreferenceArgs {
    fn default() -> Self {
        PreferenceArgs {
            tenant_id: None,
            show_opt_out_channels: true,
        }
    }
}

impl PreferenceArgs {
    fn query(&self) -> String {
        build_query(&[
            ("tenant_id", self.tenant_id.clone()),
            (
                "show_opt_out_channels",
                Some(self.show_opt_out_channels.to_string()),
            ),
        ])
    }
}

/// Pagination-aware arguments for [`Preferences::get_categories`].
#[derive(Clone, Debug, Default)]
pub struct CategoryListArgs {
    pub tenant_id: Option<String>,
    pub show_opt_out_channels: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

struct PreferenceState {
    data: Mutex<Option<PreferenceData>>,
    fetch_args: Mutex<Option<PreferenceArgs>>,
    /// Tree generation; bumped on wholesale replace and on reset.
    epoch: AtomicU64,
    debouncer: KeyedDebouncer,
}

pub struct Preferences {
    core: Arc<ClientCore>,
    state: Arc<PreferenceState>,
}

fn find_category_mut<'a>(tree: &'a mut PreferenceData, category: &str) -> Option<&'a mut Category> {
    tree.sections
        .as_mut()?
        .iter_mut()
        .filter_map(|section| section.subcategories.as_mut())
        .flatten()
        .find(|subcategory| subcategory.category == category)
}

fn tree_snapshot(tree: &PreferenceData) -> Value {
    serde_json::to_value(tree).unwrap_or(Value::Null)
}

impl Preferences {
    pub(crate) fn new(core: Arc<ClientCore>) -> Self {
        let state = Arc::new(PreferenceState {
            data: Mutex::new(None),
            fetch_args: Mutex::new(None),
            epoch: AtomicU64::new(0),
            debouncer: KeyedDebouncer::new(core.config.debounce_window),
        });
        Preferences { core, state }
    }

    /// Clone of the current mirror, if one has been fetched.
    pub fn data(&self) -> Option<PreferenceData> {
        self.state.data.lock().clone()
    }

    /// Tear down the mirror on session reset: pending coalesced updates are
    /// cancelled and in-flight reconciliations are invalidated.
    pub(crate) fn clear(&self) {
        self.state.debouncer.cancel_all();
        *self.state.data.lock() = None;
        *self.state.fetch_args.lock() = None;
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn distinct_id(&self) -> Result<String, ApiResponse> {
        self.core
            .distinct_id()
            .ok_or_else(|| ApiResponse::validation_error("user is not authenticated"))
    }

    /// Full-tree fetch; replaces the mirror wholesale on success.
    pub async fn fetch_preferences(&self, args: PreferenceArgs) -> ApiResponse {
        fetch_into(&self.core, &self.state, args).await
    }

    /// Paginated category listing; read-through, no local mutation.
    pub async fn get_categories(&self, args: CategoryListArgs) -> ApiResponse {
        let distinct_id = match self.distinct_id() {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        let query = build_query(&[
            ("tenant_id", args.tenant_id),
            (
                "show_opt_out_channels",
                Some(args.show_opt_out_channels.unwrap_or(true).to_string()),
            ),
            ("limit", args.limit.map(|v| v.to_string())),
            ("offset", args.offset.map(|v| v.to_string())),
        ]);
        let path = subscriber_path(&distinct_id, "category", &query);
        self.core.request("get", &path, None).await
    }

    /// Single-category read-through.
    pub async fn get_category(&self, category: &str, args: PreferenceArgs) -> ApiResponse {
        if category.is_empty() {
            return ApiResponse::validation_error("category parameter is missing");
        }
        let distinct_id = match self.distinct_id() {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        let path = subscriber_path(
            &distinct_id,
            &format!("category/{category}"),
            &args.query(),
        );
        self.core.request("get", &path, None).await
    }

    /// Top-level channel preference read-through.
    pub async fn get_overall_channel_preferences(&self) -> ApiResponse {
        let distinct_id = match self.distinct_id() {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        let path = subscriber_path(&distinct_id, "channel_preference", "");
        self.core.request("get", &path, None).await
    }

    /// Toggle a category's aggregate preference.
    ///
    /// Applies optimistically and returns immediately with the updated tree;
    /// the PATCH is coalesced per category and reconciled when it lands.
    pub async fn update_category_preference(
        &self,
        category: &str,
        preference: PreferenceOptions,
        args: PreferenceArgs,
    ) -> ApiResponse {
        if category.is_empty() {
            return ApiResponse::validation_error("category parameter is missing");
        }
        let distinct_id = match self.distinct_id() {
            Ok(id) => id,
            Err(resp) => return resp,
        };

        let (snapshot, opt_out_channels) = {
            let mut guard = self.state.data.lock();
            let Some(tree) = guard.as_mut() else {
                return ApiResponse::validation_error(FETCH_FIRST);
            };
            if tree.sections.is_none() {
                return ApiResponse::validation_error("sections doesn't exist");
            }

            let Some(node) = find_category_mut(tree, category) else {
                return ApiResponse::validation_error("category not found");
            };
            if !node.is_editable {
                return ApiResponse::validation_error("category preference is not editable");
            }
            if node.preference == preference {
                // idempotent short-circuit, nothing goes remote
                let snapshot = tree_snapshot(tree);
                return ApiResponse::success_with_body(snapshot);
            }

            node.preference = preference;
            let opt_out_channels = node.opt_out_channels();
            (tree_snapshot(tree), opt_out_channels)
        };

        // Opting in with visible opt-out channels resets the server-side
        // channel list; otherwise the current list rides along.
        let opt_out_value =
            if args.show_opt_out_channels && preference == PreferenceOptions::OptIn {
                Value::Null
            } else {
                json!(opt_out_channels)
            };
        let payload = json!({
            "preference": preference,
            "opt_out_channels": opt_out_value,
        });
        let path = subscriber_path(
            &distinct_id,
            &format!("category/{category}"),
            &args.query(),
        );

        self.schedule_category_patch(category, path, payload);
        ApiResponse::success_with_body(snapshot)
    }

    /// Toggle a single channel inside a category.
    ///
    /// Opting a channel in cannot coexist with a category-level opt-out, so
    /// the parent category is forced to opt-in locally before the PATCH is
    /// scheduled.
    pub async fn update_channel_preference_in_category(
        &self,
        channel: &str,
        preference: PreferenceOptions,
        category: &str,
        args: PreferenceArgs,
    ) -> ApiResponse {
        if channel.is_empty() {
            return ApiResponse::validation_error("channel parameter is missing");
        }
        if category.is_empty() {
            return ApiResponse::validation_error("category parameter is missing");
        }
        let distinct_id = match self.distinct_id() {
            Ok(id) => id,
            Err(resp) => return resp,
        };

        let (snapshot, category_preference, opt_out_channels) = {
            let mut guard = self.state.data.lock();
            let Some(tree) = guard.as_mut() else {
                return ApiResponse::validation_error(FETCH_FIRST);
            };
            if tree.sections.is_none() {
                return ApiResponse::validation_error("sections doesn't exist");
            }

            let Some(node) = find_category_mut(tree, category) else {
                return ApiResponse::validation_error("category not found");
            };
            let Some(channel_node) = node
                .channels
                .as_mut()
                .and_then(|channels| channels.iter_mut().find(|c| c.channel == channel))
            else {
                return ApiResponse::validation_error("category's channel not found");
            };
            if !channel_node.is_editable {
                return ApiResponse::validation_error("channel preference is not editable");
            }
            if channel_node.preference == preference {
                let snapshot = tree_snapshot(tree);
                return ApiResponse::success_with_body(snapshot);
            }

            channel_node.preference = preference;
            if preference == PreferenceOptions::OptIn {
                node.preference = PreferenceOptions::OptIn;
            }
            let category_preference = node.preference;
            let opt_out_channels = node.opt_out_channels();
            (tree_snapshot(tree), category_preference, opt_out_channels)
        };

        let payload = json!({
            "preference": category_preference,
            "opt_out_channels": opt_out_channels,
        });
        let path = subscriber_path(
            &distinct_id,
            &format!("category/{category}"),
            &args.query(),
        );

        self.schedule_category_patch(category, path, payload);
        ApiResponse::success_with_body(snapshot)
    }

    /// Set a channel's top-level restriction level.
    ///
    /// `Required` restricts the channel to mandatory sends; `All` lifts the
    /// restriction. A successful PATCH re-syncs the whole tree instead of
    /// merging locally, because the restriction changes category-level
    /// visibility server-side.
    pub async fn update_overall_channel_preference(
        &self,
        channel: &str,
        level: ChannelLevelPreferenceOptions,
    ) -> ApiResponse {
        if channel.is_empty() {
            return ApiResponse::validation_error("channel parameter is missing");
        }
        let distinct_id = match self.distinct_id() {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        let restricted = level == ChannelLevelPreferenceOptions::Required;

        let (snapshot, entry) = {
            let mut guard = self.state.data.lock();
            let Some(tree) = guard.as_mut() else {
                return ApiResponse::validation_error(FETCH_FIRST);
            };
            let Some(channel_preferences) = tree.channel_preferences.as_mut() else {
                return ApiResponse::validation_error("channel preferences doesn't exist");
            };

            let Some(entry) = channel_preferences
                .iter_mut()
                .find(|entry| entry.channel == channel)
            else {
                return ApiResponse::validation_error("channel data not found");
            };
            if entry.is_restricted == restricted {
                let snapshot = tree_snapshot(tree);
                return ApiResponse::success_with_body(snapshot);
            }

            entry.is_restricted = restricted;
            let entry = entry.clone();
            (tree_snapshot(tree), entry)
        };

        let path = subscriber_path(&distinct_id, "channel_preference", "");
        let payload = json!({ "channel_preferences": [entry] });
        self.schedule_channel_patch(channel, path, payload);
        ApiResponse::success_with_body(snapshot)
    }

    /// Coalesced PATCH of a category resource, reconciled by field-merge.
    fn schedule_category_patch(&self, category: &str, path: String, payload: Value) {
        let core = self.core.clone();
        let state = self.state.clone();
        let category = category.to_string();
        let epoch = self.state.epoch.load(Ordering::SeqCst);

        // category and channel keys live in separate debounce namespaces
        let key = format!("category:{category}");
        self.state.debouncer.call(&key, async move {
            let resp = core.request("patch", &path, Some(&payload)).await;
            if resp.is_error() {
                core.bus.emit(&SdkEvent::PreferencesError(resp));
                return;
            }

            let merged = {
                let mut guard = state.data.lock();
                match guard.as_mut() {
                    Some(tree) if state.epoch.load(Ordering::SeqCst) == epoch => {
                        if let Some(patch) = resp
                            .body
                            .clone()
                            .and_then(|body| serde_json::from_value::<CategoryPatch>(body).ok())
                        {
                            if let Some(node) = find_category_mut(tree, &category) {
                                patch.apply(node);
                            }
                        }
                        Some(tree_snapshot(tree))
                    }
                    _ => None,
                }
            };

            match merged {
                Some(tree_value) => core.bus.emit(&SdkEvent::PreferencesUpdated(
                    ApiResponse::success_with_body(tree_value).with_status_code(200),
                )),
                None => debug!(category = %category, "dropping reconciliation for replaced preference tree"),
            }
        });
    }

    /// Coalesced PATCH of the top-level channel-preference list; success
    /// re-syncs the whole tree before notifying observers.
    fn schedule_channel_patch(&self, channel: &str, path: String, payload: Value) {
        let core = self.core.clone();
        let state = self.state.clone();
        let channel = channel.to_string();
        let epoch = self.state.epoch.load(Ordering::SeqCst);

        let key = format!("channel:{channel}");
        self.state.debouncer.call(&key, async move {
            let resp = core.request("patch", &path, Some(&payload)).await;
            if resp.is_error() {
                core.bus.emit(&SdkEvent::PreferencesError(resp));
                return;
            }
            if state.epoch.load(Ordering::SeqCst) != epoch {
                debug!(channel = %channel, "dropping reconciliation for replaced preference tree");
                return;
            }

            let args = state.fetch_args.lock().clone().unwrap_or_default();
            let refetch = fetch_into(&core, &state, args).await;
            if refetch.is_error() {
                core.bus.emit(&SdkEvent::PreferencesError(refetch));
                return;
            }

            let snapshot = state.data.lock().as_ref().map(tree_snapshot);
            if let Some(tree_value) = snapshot {
                core.bus.emit(&SdkEvent::PreferencesUpdated(
                    ApiResponse::success_with_body(tree_value).with_status_code(200),
                ));
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn seed_for_tests(&self, tree: PreferenceData) {
        *self.state.data.lock() = Some(tree);
    }
}

async fn fetch_into(
    core: &Arc<ClientCore>,
    state: &Arc<PreferenceState>,
    args: PreferenceArgs,
) -> ApiResponse {
    let Some(distinct_id) = core.distinct_id() else {
        return ApiResponse::validation_error("user is not authenticated");
    };

    *state.fetch_args.lock() = Some(args.clone());
    let path = subscriber_path(&distinct_id, "full_preference", &args.query());
    let resp = core.request("get", &path, None).await;

    if resp.is_success() {
        let tree = resp
            .body
            .clone()
            .map(serde_json::from_value::<PreferenceData>);
        match tree {
            Some(Ok(tree)) => {
                let mut guard = state.data.lock();
                *guard = Some(tree);
                state.epoch.fetch_add(1, Ordering::SeqCst);
            }
            Some(Err(e)) => {
                return ApiResponse::network_error(format!("malformed preference data: {e}"))
            }
            None => return ApiResponse::network_error("empty preference response"),
        }
    }
    resp
}
