// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use chrono::DateTime;
use common::fix::{Fix, FixSource};
use std::sync::Arc;
use viewer::reconciler::{ReconciliationState, SourceReconciler};

fn fix(latitude: f64, source: FixSource) -> Arc<Fix> {
    let captured_at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
    Arc::new(Fix::new(
        latitude, 0.0, None, None, source, &captured_at,
    ))
}

fn device_fix(latitude: f64) -> Arc<Fix> {
    fix(latitude, FixSource::Device)
}

fn external_fix(latitude: f64) -> Arc<Fix> {
    fix(latitude, FixSource::External)
}

#[test]
fn device_fix_is_rendered_by_default() {
    let mut reconciler = SourceReconciler::new();
    assert_eq!(reconciler.state(), ReconciliationState::NoFix);

    let rendered = reconciler.on_device_fix(device_fix(1.0)).unwrap();
    assert_eq!(rendered.fix.latitude(), 1.0);
    assert_eq!(rendered.source, FixSource::Device);
    assert_eq!(reconciler.state(), ReconciliationState::UsingDevice);
}

#[test]
fn external_fix_is_tracked_but_not_rendered_while_device_active() {
    let mut reconciler = SourceReconciler::new();
    reconciler.on_device_fix(device_fix(1.0));
    reconciler.on_availability(true);

    assert!(reconciler.on_external_fix(external_fix(50.0)).is_none());
    assert_eq!(reconciler.state(), ReconciliationState::UsingDevice);

    // The tracked fix is rendered as soon as the source is switched.
    let rendered = reconciler.on_toggle().unwrap();
    assert_eq!(rendered.fix.latitude(), 50.0);
    assert_eq!(rendered.source, FixSource::External);
}

#[test]
fn toggle_is_ignored_while_external_stream_unavailable() {
    let mut reconciler = SourceReconciler::new();
    reconciler.on_device_fix(device_fix(1.0));

    assert!(reconciler.on_toggle().is_none());
    assert_eq!(reconciler.state(), ReconciliationState::UsingDevice);
}

#[test]
fn toggle_before_first_external_fix_renders_nothing_until_one_arrives() {
    let mut reconciler = SourceReconciler::new();
    reconciler.on_device_fix(device_fix(1.0));
    reconciler.on_availability(true);
    reconciler.on_external_fix(external_fix(10.0));
    reconciler.on_availability(false);
    reconciler.on_availability(true);

    // The last external fix was dropped with the old connection, the
    // switch itself renders nothing.
    assert!(reconciler.on_toggle().is_none());
    assert_eq!(reconciler.state(), ReconciliationState::UsingExternal);

    let rendered = reconciler.on_external_fix(external_fix(11.0)).unwrap();
    assert_eq!(rendered.fix.latitude(), 11.0);
}

#[test]
fn device_fix_is_tracked_but_not_rendered_while_external_active() {
    let mut reconciler = SourceReconciler::new();
    reconciler.on_availability(true);
    reconciler.on_external_fix(external_fix(10.0));
    reconciler.on_toggle();
    assert_eq!(reconciler.state(), ReconciliationState::UsingExternal);

    assert!(reconciler.on_device_fix(device_fix(2.0)).is_none());

    let rendered = reconciler.on_toggle().unwrap();
    assert_eq!(rendered.fix.latitude(), 2.0);
    assert_eq!(rendered.source, FixSource::Device);
    assert_eq!(reconciler.state(), ReconciliationState::UsingDevice);
}

#[test]
fn availability_loss_falls_back_to_last_device_fix() {
    let mut reconciler = SourceReconciler::new();
    reconciler.on_device_fix(device_fix(3.0));
    reconciler.on_availability(true);
    reconciler.on_external_fix(external_fix(30.0));
    reconciler.on_toggle();

    let rendered = reconciler.on_availability(false).unwrap();
    assert_eq!(rendered.fix.latitude(), 3.0);
    assert_eq!(rendered.source, FixSource::Device);
    assert_eq!(reconciler.state(), ReconciliationState::UsingDevice);
    assert!(!reconciler.external_available());
}

#[test]
fn availability_loss_without_device_fix_yields_no_position() {
    let mut reconciler = SourceReconciler::new();
    reconciler.on_availability(true);
    reconciler.on_external_fix(external_fix(30.0));
    reconciler.on_toggle();

    assert!(reconciler.on_availability(false).is_none());
    assert_eq!(reconciler.state(), ReconciliationState::NoFix);
}

#[test]
fn external_preference_does_not_survive_availability_loss() {
    let mut reconciler = SourceReconciler::new();
    reconciler.on_device_fix(device_fix(1.0));
    reconciler.on_availability(true);
    reconciler.on_external_fix(external_fix(10.0));
    reconciler.on_toggle();
    reconciler.on_availability(false);
    reconciler.on_availability(true);

    // The recovered stream delivers again but the device stays active
    // until the viewer toggles again.
    assert!(reconciler.on_external_fix(external_fix(12.0)).is_none());
    assert_eq!(reconciler.state(), ReconciliationState::UsingDevice);
}

#[test]
fn availability_loss_while_device_active_renders_nothing() {
    let mut reconciler = SourceReconciler::new();
    reconciler.on_device_fix(device_fix(1.0));
    reconciler.on_availability(true);
    reconciler.on_external_fix(external_fix(10.0));

    assert!(reconciler.on_availability(false).is_none());
    assert_eq!(reconciler.state(), ReconciliationState::UsingDevice);
}

#[tokio::test]
#[test_log::test]
async fn rendering_continues_after_a_consumer_is_dropped() {
    let mut reconciler = SourceReconciler::new();
    let mut live = reconciler.register_consumer();
    let gone = reconciler.register_consumer();
    drop(gone);
    let (device_tx, device_rx) = tokio::sync::mpsc::channel(10);
    let (_subscriber_tx, subscriber_rx) = tokio::sync::mpsc::channel(10);
    let (_toggle_tx, toggle_rx) = tokio::sync::mpsc::channel(10);
    let cancel = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(reconciler.run(
        device_rx,
        subscriber_rx,
        toggle_rx,
        cancel.clone(),
    ));

    device_tx.send(device_fix(1.0)).await.unwrap();
    let rendered = tokio::time::timeout(std::time::Duration::from_secs(1), live.recv())
        .await
        .expect("No position rendered")
        .expect("Position channel closed");
    assert_eq!(rendered.fix.latitude(), 1.0);

    // The dropped consumer does not block later renders.
    device_tx.send(device_fix(2.0)).await.unwrap();
    let rendered = tokio::time::timeout(std::time::Duration::from_secs(1), live.recv())
        .await
        .expect("No position rendered")
        .expect("Position channel closed");
    assert_eq!(rendered.fix.latitude(), 2.0);

    cancel.cancel();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), task)
        .await
        .expect("Reconciler did not stop on cancellation");
}

#[tokio::test]
#[test_log::test]
async fn run_renders_to_registered_consumers() {
    let mut reconciler = SourceReconciler::new();
    let mut positions = reconciler.register_consumer();
    let (device_tx, device_rx) = tokio::sync::mpsc::channel(10);
    let (subscriber_tx, subscriber_rx) = tokio::sync::mpsc::channel(10);
    let (toggle_tx, toggle_rx) = tokio::sync::mpsc::channel(10);
    let cancel = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(reconciler.run(
        device_rx,
        subscriber_rx,
        toggle_rx,
        cancel.clone(),
    ));

    device_tx.send(device_fix(1.0)).await.unwrap();
    let rendered = tokio::time::timeout(std::time::Duration::from_secs(1), positions.recv())
        .await
        .expect("No position rendered")
        .expect("Position channel closed");
    assert_eq!(rendered.fix.latitude(), 1.0);
    assert_eq!(rendered.source, FixSource::Device);

    subscriber_tx
        .send(viewer::subscriber::SubscriberEvent::Availability(true))
        .await
        .unwrap();
    subscriber_tx
        .send(viewer::subscriber::SubscriberEvent::Fix(external_fix(10.0)))
        .await
        .unwrap();
    toggle_tx.send(()).await.unwrap();
    let rendered = tokio::time::timeout(std::time::Duration::from_secs(1), positions.recv())
        .await
        .expect("No position rendered")
        .expect("Position channel closed");
    assert_eq!(rendered.fix.latitude(), 10.0);
    assert_eq!(rendered.source, FixSource::External);

    cancel.cancel();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), task)
        .await
        .expect("Reconciler did not stop on cancellation");
}
