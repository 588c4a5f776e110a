//! Invoke-channel handlers for the monitoring core
//!
//! Channel names are verb-first and hyphenated. Every handler goes through
//! the registry's validation and envelope wrapping; the closures here only
//! decode parameters and delegate to the orchestrator, the site pipeline
//! or the lifecycle managers.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::monitor::Monitor;
use crate::domain::site::Site;
use crate::ipc::registry::{IpcRegistry, ParamKind, ParamSpec};
use crate::lifecycle::MonitoringLifecycle;
use crate::orchestrator::Orchestrator;
use crate::sites::{MonitorChanges, SiteChanges, SiteManager};
use crate::utils::error::{Result, WatcherError};

/// Channels the diagnostics handshake expects to find registered
pub const EXPECTED_CHANNELS: &[&str] = &[
    "get-sites",
    "add-site",
    "update-site",
    "remove-site",
    "add-monitor",
    "update-monitor",
    "remove-monitor",
    "check-site-now",
    "start-monitoring",
    "stop-monitoring",
    "start-monitoring-for-site",
    "stop-monitoring-for-site",
    "start-monitoring-for-monitor",
    "stop-monitoring-for-monitor",
    "get-history-limit",
    "update-history-limit",
    "get-monitor-history",
    "reset-settings",
    "save-sqlite-backup",
    "request-full-sync",
    "diagnostics:verify-handlers",
];

/// Everything the handlers delegate to
#[derive(Clone)]
pub struct CoreHandles {
    pub orchestrator: Arc<Orchestrator>,
    pub site_manager: Arc<SiteManager>,
    pub lifecycle: Arc<MonitoringLifecycle>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitorRef {
    site_id: String,
    monitor_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSiteArgs {
    identifier: String,
    changes: SiteChanges,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMonitorArgs {
    site_id: String,
    monitor: Monitor,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateMonitorArgs {
    site_id: String,
    monitor_id: String,
    changes: MonitorChanges,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryArgs {
    monitor_id: String,
    #[serde(default)]
    limit: Option<u64>,
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| WatcherError::validation(e.to_string()))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(Into::into)
}

fn take_one(mut params: Vec<Value>) -> Value {
    params.drain(..).next().unwrap_or(Value::Null)
}

/// Register every core channel on the registry
pub fn register_core_handlers(ipc: &Arc<IpcRegistry>, handles: &CoreHandles) -> Result<()> {
    let object = ParamSpec::of(&[ParamKind::Object]);
    let string = ParamSpec::of(&[ParamKind::String]);
    let number = ParamSpec::of(&[ParamKind::Number]);

    // ------------------------------------------------------------------
    // Sites
    // ------------------------------------------------------------------

    let orchestrator = handles.orchestrator.clone();
    ipc.register("get-sites", ParamSpec::none(), move |_| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move { encode(&orchestrator.get_sites()?) })
    })?;

    let site_manager = handles.site_manager.clone();
    ipc.register("add-site", object.clone(), move |params| {
        let site_manager = site_manager.clone();
        Box::pin(async move {
            let site: Site = decode(take_one(params))?;
            encode(&site_manager.add_site(site)?)
        })
    })?;

    let site_manager = handles.site_manager.clone();
    ipc.register("update-site", object.clone(), move |params| {
        let site_manager = site_manager.clone();
        Box::pin(async move {
            let args: UpdateSiteArgs = decode(take_one(params))?;
            encode(&site_manager.update_site(&args.identifier, &args.changes)?)
        })
    })?;

    let site_manager = handles.site_manager.clone();
    ipc.register("remove-site", string.clone(), move |params| {
        let site_manager = site_manager.clone();
        Box::pin(async move {
            let identifier: String = decode(take_one(params))?;
            encode(&site_manager.remove_site(&identifier)?)
        })
    })?;

    // ------------------------------------------------------------------
    // Monitors
    // ------------------------------------------------------------------

    let site_manager = handles.site_manager.clone();
    ipc.register("add-monitor", object.clone(), move |params| {
        let site_manager = site_manager.clone();
        Box::pin(async move {
            let args: AddMonitorArgs = decode(take_one(params))?;
            encode(&site_manager.add_monitor(&args.site_id, args.monitor)?)
        })
    })?;

    let site_manager = handles.site_manager.clone();
    ipc.register("update-monitor", object.clone(), move |params| {
        let site_manager = site_manager.clone();
        Box::pin(async move {
            let args: UpdateMonitorArgs = decode(take_one(params))?;
            encode(&site_manager.update_monitor(&args.site_id, &args.monitor_id, &args.changes)?)
        })
    })?;

    let site_manager = handles.site_manager.clone();
    ipc.register("remove-monitor", object.clone(), move |params| {
        let site_manager = site_manager.clone();
        Box::pin(async move {
            let args: MonitorRef = decode(take_one(params))?;
            encode(&site_manager.remove_monitor(&args.site_id, &args.monitor_id)?)
        })
    })?;

    // ------------------------------------------------------------------
    // Checks and monitoring lifecycle
    // ------------------------------------------------------------------

    let orchestrator = handles.orchestrator.clone();
    ipc.register("check-site-now", object.clone(), move |params| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move {
            let args: MonitorRef = decode(take_one(params))?;
            // `null` means the manual check was queued; the result will
            // arrive over the broadcast channel instead
            encode(&orchestrator.check_now(&args.site_id, &args.monitor_id).await?)
        })
    })?;

    let lifecycle = handles.lifecycle.clone();
    ipc.register("start-monitoring", ParamSpec::none(), move |_| {
        let lifecycle = lifecycle.clone();
        Box::pin(async move { encode(&lifecycle.start_all().await?) })
    })?;

    let lifecycle = handles.lifecycle.clone();
    ipc.register("stop-monitoring", ParamSpec::none(), move |_| {
        let lifecycle = lifecycle.clone();
        Box::pin(async move { encode(&lifecycle.stop_all().await?) })
    })?;

    let lifecycle = handles.lifecycle.clone();
    ipc.register("start-monitoring-for-site", string.clone(), move |params| {
        let lifecycle = lifecycle.clone();
        Box::pin(async move {
            let identifier: String = decode(take_one(params))?;
            encode(&lifecycle.start_site(&identifier).await?)
        })
    })?;

    let lifecycle = handles.lifecycle.clone();
    ipc.register("stop-monitoring-for-site", string.clone(), move |params| {
        let lifecycle = lifecycle.clone();
        Box::pin(async move {
            let identifier: String = decode(take_one(params))?;
            encode(&lifecycle.stop_site(&identifier).await?)
        })
    })?;

    let lifecycle = handles.lifecycle.clone();
    ipc.register(
        "start-monitoring-for-monitor",
        object.clone(),
        move |params| {
            let lifecycle = lifecycle.clone();
            Box::pin(async move {
                let args: MonitorRef = decode(take_one(params))?;
                encode(&lifecycle.start_monitor(&args.site_id, &args.monitor_id).await?)
            })
        },
    )?;

    let lifecycle = handles.lifecycle.clone();
    ipc.register(
        "stop-monitoring-for-monitor",
        object.clone(),
        move |params| {
            let lifecycle = lifecycle.clone();
            Box::pin(async move {
                let args: MonitorRef = decode(take_one(params))?;
                encode(&lifecycle.stop_monitor(&args.site_id, &args.monitor_id).await?)
            })
        },
    )?;

    // ------------------------------------------------------------------
    // Settings, history, backup, sync
    // ------------------------------------------------------------------

    let orchestrator = handles.orchestrator.clone();
    ipc.register("get-history-limit", ParamSpec::none(), move |_| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move { encode(&orchestrator.get_history_limit()?) })
    })?;

    let orchestrator = handles.orchestrator.clone();
    ipc.register("update-history-limit", number, move |params| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move {
            let requested = take_one(params).as_f64().unwrap_or(f64::NAN);
            encode(&orchestrator.update_history_limit(requested)?)
        })
    })?;

    let orchestrator = handles.orchestrator.clone();
    ipc.register("get-monitor-history", object, move |params| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move {
            let args: HistoryArgs = decode(take_one(params))?;
            encode(&orchestrator.monitor_history(&args.monitor_id, args.limit)?)
        })
    })?;

    let orchestrator = handles.orchestrator.clone();
    ipc.register("reset-settings", ParamSpec::none(), move |_| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move {
            orchestrator.reset_settings()?;
            Ok(Value::Null)
        })
    })?;

    let orchestrator = handles.orchestrator.clone();
    ipc.register("save-sqlite-backup", ParamSpec::none(), move |_| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move { encode(&orchestrator.save_backup()?) })
    })?;

    let orchestrator = handles.orchestrator.clone();
    ipc.register("request-full-sync", ParamSpec::none(), move |_| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move { encode(&orchestrator.full_sync()?) })
    })?;

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    let registry = ipc.clone();
    ipc.register("diagnostics:verify-handlers", ParamSpec::none(), move |_| {
        let registry = registry.clone();
        Box::pin(async move {
            let channels = registry.channels();
            let missing = registry.verify_handlers(EXPECTED_CHANNELS);
            Ok(serde_json::json!({ "channels": channels, "missing": missing }))
        })
    })?;

    Ok(())
}
