//! Subscribes to hub events and logs them until Ctrl-C.

use std::collections::BTreeMap;

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, info, warn};

use cowork_hub_connection::{ConnectionEvent, HubConfig, HubManager};

/// Events to listen for, per hub.
pub type Subscriptions = BTreeMap<String, Vec<String>>;

/// Parses `hub:Event[,Event...]` arguments.
pub fn parse_subscriptions(args: &[String]) -> anyhow::Result<Subscriptions> {
    if args.is_empty() {
        anyhow::bail!("usage: cowork-notify-listener <hub>:<Event>[,<Event>...] ...");
    }

    let mut subscriptions = Subscriptions::new();
    for arg in args {
        let (hub, events) = arg
            .split_once(':')
            .with_context(|| format!("expected <hub>:<Event>, got '{arg}'"))?;
        let hub = hub.trim();
        if hub.is_empty() {
            anyhow::bail!("missing hub name in '{arg}'");
        }

        let entry = subscriptions.entry(hub.to_string()).or_default();
        for event in events.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if !entry.iter().any(|e| e.eq_ignore_ascii_case(event)) {
                entry.push(event.to_string());
            }
        }
        if entry.is_empty() {
            anyhow::bail!("no events given for hub '{hub}'");
        }
    }
    Ok(subscriptions)
}

fn describe(args: &[Value]) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| "<unprintable>".into())
}

/// Connects every subscribed hub and logs notifications until Ctrl-C.
pub async fn run(config: HubConfig, subscriptions: Subscriptions, token: String) -> anyhow::Result<()> {
    let manager = HubManager::new(config)?;

    let mut events = manager
        .take_events()
        .await
        .context("event receiver already taken")?;
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::StateChanged { hub, state } => {
                    info!(hub = %hub, state = ?state, "connection state changed");
                }
                ConnectionEvent::Retrying { hub, attempt, delay, error } => {
                    warn!(hub = %hub, attempt, delay_ms = delay.as_millis() as u64, error = %error, "connect attempt failed");
                }
                ConnectionEvent::Reconnecting { hub, attempt, next_retry_ms } => {
                    warn!(hub = %hub, attempt, next_retry_ms, "connection lost, reconnecting");
                }
                ConnectionEvent::Reconnected { hub, connection_id } => {
                    info!(hub = %hub, connection_id = ?connection_id, "connection restored");
                }
                ConnectionEvent::Closed { hub, error } => {
                    warn!(hub = %hub, error = ?error, "connection closed");
                }
            }
        }
    });

    // Register first: handlers are queued and attached once each hub connects.
    for (hub, names) in &subscriptions {
        for name in names {
            let (h, n) = (hub.clone(), name.clone());
            let registration = manager.register_event(hub, name, move |args| {
                info!(hub = %h, event = %n, payload = %describe(args), "notification");
            })?;
            debug!(hub = %hub, event = %name, registration = ?registration, "handler registered");
        }
    }

    for hub in subscriptions.keys() {
        match manager.start_connection(hub, &token).await {
            Ok(_) => info!(hub = %hub, "listening"),
            Err(e) => warn!(hub = %hub, error = %e, "could not connect, skipping hub"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutting down");

    manager.shutdown().await;
    event_log.abort();
    Ok(())
}
