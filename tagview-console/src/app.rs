//! Application wiring.
//!
//! Every component is constructed once here, explicitly, and torn down on
//! shutdown; there is no ambient global state. Data flows one way:
//! push transport → fan-in → classifier → streams → relay / view sessions.

use std::sync::Arc;

use tagview_core::claim::{ClaimTable, ViewId};
use tagview_core::config::{ConfigStore, ScannerSet};
use tagview_core::events::{
    ChannelName, CoreStreams, command_channel, envelope_channel,
};
use tagview_core::gateway::RestGateway;
use tagview_core::processors::{
    ChannelFanIn, ClassifierHandle, EventClassifier, StateMediator, SubscriptionHandle,
};
use tagview_core::view::{ClaimPolicy, SessionEvent, ViewBinding, ViewSession};
use tagview_sdk::client::ConsoleClient;
use tagview_sdk::objects::search::SearchRequest;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::file::FileConfig;
use crate::push::PushLink;

/// Build and run the whole console until shutdown is signaled.
pub async fn run(
    config: FileConfig,
    scanner_store: ConfigStore<ScannerSet>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let core_config = config.core_config();
    let push_endpoint = config.push_endpoint()?;

    // -- Core components ----------------------------------------------------
    let streams = CoreStreams::with_capacity(core_config.stream_capacity);
    let (envelope_tx, envelope_rx) = envelope_channel();
    let (cmd_tx, cmd_rx) = command_channel();

    let classifier_handle = ClassifierHandle::new(cmd_tx, streams.clone());
    let classifier = EventClassifier::new(
        &core_config,
        streams.clone(),
        envelope_rx,
        cmd_rx,
        shutdown_rx.clone(),
    );

    let fan_in = Arc::new(ChannelFanIn::new(envelope_tx));
    // The always-on channels; per-scanner channels follow the config.
    fan_in.subscribe(ChannelName::Priority);
    fan_in.subscribe(ChannelName::Broadcast);
    fan_in.subscribe(ChannelName::Registrations);

    let gateway: Arc<dyn RestGateway> =
        Arc::new(ConsoleClient::new(config.server.base_url.clone()));
    let mediator = StateMediator::new(classifier_handle, Arc::clone(&gateway));
    let relay = mediator.relay();
    let claims = Arc::new(ClaimTable::new());

    // The activity feed: one display-only session over the newest units.
    let (activity_session, activity_binding) = ViewSession::new(
        ViewId::generate("activity"),
        mediator.clone(),
        Arc::clone(&gateway),
        Arc::clone(&claims),
        SearchRequest::first_page(core_config.page_size),
        ClaimPolicy::DisplayOnly,
    );

    // -- Tasks --------------------------------------------------------------
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    tasks.push(tokio::spawn(classifier.run()));
    tasks.push(tokio::spawn(relay.run(
        shutdown_rx.clone(),
        streams.subscribe_predictive(),
        streams.subscribe_settlement(),
    )));
    tasks.push(tokio::spawn(activity_session.run(shutdown_rx.clone())));
    tasks.push(tokio::spawn(activity_feed(
        activity_binding,
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(scanner_reconciler(
        Arc::clone(&fan_in),
        scanner_store,
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(
        PushLink::new(push_endpoint, fan_in).run(shutdown_rx.clone()),
    ));

    info!("Console running");

    // Wait for shutdown, then let every task drain.
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }
    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}

/// Log the reconciled activity feed as it changes.
async fn activity_feed(mut binding: ViewBinding, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            changed = binding.rows.changed() => {
                if changed.is_err() {
                    break;
                }
                let rows = binding.rows.borrow_and_update().clone();
                let pending = rows
                    .iter()
                    .filter(|row| row.phase != tagview_core::view::RowPhase::Settled)
                    .count();
                info!(rows = rows.len(), pending, "Activity feed updated");
            }

            event = binding.events.recv() => {
                match event {
                    Some(SessionEvent::RowError { key, message }) => {
                        warn!(natural_key = %key, %message, "Row failed");
                    }
                    Some(SessionEvent::ClaimedScan(_)) => {}
                    None => break,
                }
            }
        }
    }
}

/// Keep the fan-in's per-scanner subscriptions aligned with the config.
///
/// On every config change, diff the live subscriptions against the wanted
/// scanner set: subscribe additions, release removals.
async fn scanner_reconciler(
    fan_in: Arc<ChannelFanIn>,
    scanner_store: ConfigStore<ScannerSet>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut watcher = scanner_store.subscribe();
    let mut active: Vec<(ChannelName, SubscriptionHandle)> = Vec::new();

    apply_scanner_set(&fan_in, &mut active, &*scanner_store.read().await);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            changed = watcher.changed() => {
                if changed.is_err() {
                    break;
                }
                let wanted = scanner_store.read().await.clone();
                apply_scanner_set(&fan_in, &mut active, &wanted);
                info!(scanners = wanted.scanner_ids.len(), "Scanner set reconciled");
            }
        }
    }

    for (_, handle) in &active {
        fan_in.unsubscribe(handle);
    }
}

fn apply_scanner_set(
    fan_in: &ChannelFanIn,
    active: &mut Vec<(ChannelName, SubscriptionHandle)>,
    wanted: &ScannerSet,
) {
    let wanted_channels: Vec<ChannelName> = wanted
        .scanner_ids
        .iter()
        .map(|id| ChannelName::Scanner(id.clone()))
        .collect();

    // 1. Release scanners absent from the new set.
    active.retain(|(channel, handle)| {
        let keep = wanted_channels.contains(channel);
        if !keep {
            info!(%channel, "Releasing removed scanner channel");
            fan_in.unsubscribe(handle);
        }
        keep
    });

    // 2. Subscribe newly added scanners.
    for channel in wanted_channels {
        if !active.iter().any(|(c, _)| c == &channel) {
            info!(%channel, "Subscribing new scanner channel");
            let handle = fan_in.subscribe(channel.clone());
            active.push((channel, handle));
        }
    }
}
