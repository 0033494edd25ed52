// Integration test: discovery, adapter monitoring and permission results
//
// Drives the manager the way a host platform would: listeners attach and
// detach, the radio toggles, scan results and permission answers arrive
// asynchronously.

use btprint_core::testing::{FakePermissions, FakePlatform};
use btprint_core::{
    Adapter, BluetoothState, Device, DeviceType, DiscoveryOutcome, Event, ManagerConfig,
    PacingConfig, PermissionStatus, PrinterError, PrinterManager, RadioPower,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

fn paired() -> Vec<Device> {
    vec![
        Device::new("00:11:22:33:44:55")
            .with_name("PT-210")
            .with_kind(DeviceType::Classic),
        Device::new("66:77:88:99:AA:BB")
            .with_name("RPP02N")
            .with_kind(DeviceType::Dual),
    ]
}

async fn next(subscription: &mut btprint_core::Subscription) -> Event {
    tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .expect("event within a second")
        .expect("stream open")
}

#[tokio::test]
async fn test_first_listener_receives_paired_devices() {
    let fakes = FakePlatform::with_paired(paired());
    let manager = PrinterManager::start(ManagerConfig::default(), fakes.platform()).expect("start");

    let mut subscription = manager.subscribe().expect("subscribe");
    for device in paired() {
        let event = next(&mut subscription).await;
        assert_eq!(event.code(), Some(4));
        assert_eq!(event, Event::DeviceFound(device));
    }

    let record = Event::DeviceFound(paired()[0].clone()).to_record();
    assert_eq!(record["code"], 4);
    assert_eq!(record["name"], "PT-210");
    assert_eq!(record["type"], 1);
}

#[tokio::test]
async fn test_detaching_last_listener_halts_discovery() {
    let fakes = FakePlatform::with_paired(paired());
    let manager = PrinterManager::start(ManagerConfig::default(), fakes.platform()).expect("start");

    let subscription = manager.subscribe().expect("subscribe");
    assert!(fakes.adapter.is_discovering());
    drop(subscription);
    assert!(!fakes.adapter.is_discovering());
    assert_eq!(manager.listener_count(), 0);

    // A late scan result has nobody to go to; it is not held for the next listener.
    manager.device_found(Device::new("CC:DD:EE:FF:00:11"));
    manager.flush_events().await;

    let mut next_listener = manager.subscribe().expect("subscribe");
    manager.flush_events().await;
    let mut seen = Vec::new();
    while let Some(event) = next_listener.try_recv() {
        seen.push(event);
    }
    let expected: Vec<Event> = paired().into_iter().map(Event::DeviceFound).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_scan_results_reach_every_listener() {
    let fakes = FakePlatform::new();
    let manager = PrinterManager::start(ManagerConfig::default(), fakes.platform()).expect("start");
    let mut first = manager.subscribe().expect("subscribe");
    let mut second = manager.subscribe().expect("subscribe");

    let found = Device::new("CC:DD:EE:FF:00:11").with_kind(DeviceType::Le);
    manager.device_found(found.clone());
    manager
        .watch_scan(futures::stream::iter(vec![Device::new("12:34:56:78:9A:BC")]))
        .await
        .expect("scan watcher");

    for subscription in [&mut first, &mut second] {
        assert_eq!(next(subscription).await, Event::DeviceFound(found.clone()));
        assert_eq!(
            next(subscription).await,
            Event::DeviceFound(Device::new("12:34:56:78:9A:BC"))
        );
    }
}

#[tokio::test]
async fn test_radio_toggle_notifies_and_rescans() {
    let fakes = FakePlatform::with_paired(paired());
    let manager = PrinterManager::start(ManagerConfig::default(), fakes.platform()).expect("start");
    let mut subscription = manager.subscribe().expect("subscribe");
    let _ = next(&mut subscription).await;
    let _ = next(&mut subscription).await;

    fakes.adapter.set_enabled(false);
    manager.radio_power_changed(RadioPower::Off).await;
    assert_eq!(next(&mut subscription).await, Event::RadioDisabled);
    assert_eq!(Event::RadioDisabled.to_record()["code"], 1);
    assert_eq!(manager.get_state(), BluetoothState::Off);

    fakes.adapter.set_enabled(true);
    manager
        .watch_radio(futures::stream::iter(vec![
            RadioPower::TurningOn,
            RadioPower::On,
        ]))
        .await
        .expect("radio watcher");
    for device in paired() {
        assert_eq!(next(&mut subscription).await, Event::DeviceFound(device));
    }
}

#[tokio::test]
async fn test_radio_off_closes_idle_channels() {
    let fakes = FakePlatform::new();
    let manager = PrinterManager::start(ManagerConfig::default(), fakes.platform()).expect("start");
    manager.connect("AA").await.expect("connect");

    manager.radio_power_changed(RadioPower::Off).await;
    assert!(!manager.is_connected("AA"));
    assert_eq!(fakes.log().live("AA"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_radio_off_during_keep_alive_write_drops_channel() {
    let fakes = FakePlatform::new();
    fakes.connector.set_open_delay(Duration::from_millis(100));
    let manager = PrinterManager::start(
        ManagerConfig::default().with_pacing(PacingConfig::disabled()),
        fakes.platform(),
    )
    .expect("start");

    let writer = manager.clone();
    let write =
        tokio::spawn(async move { writer.write("AA", b"ticket".to_vec(), true, None).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.radio_power_changed(RadioPower::Off).await;

    assert!(write.await.expect("write task").expect("write"));
    assert!(!manager.is_connected("AA"));
    let log = fakes.log();
    assert_eq!(log.written("AA"), b"ticket".to_vec());
    assert_eq!(log.live("AA"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_radio_off_during_connect_fails_it() {
    let fakes = FakePlatform::new();
    fakes.connector.set_open_delay(Duration::from_millis(100));
    let manager = PrinterManager::start(ManagerConfig::default(), fakes.platform()).expect("start");

    let connector = manager.clone();
    let connect = tokio::spawn(async move { connector.connect("AA").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.radio_power_changed(RadioPower::Off).await;

    assert_eq!(
        connect.await.expect("connect task"),
        Err(PrinterError::RadioUnavailable)
    );
    assert!(!manager.is_connected("AA"));
    assert_eq!(fakes.log().live("AA"), 0);
}

#[tokio::test]
async fn test_permission_flow() {
    let fakes = FakePlatform {
        permissions: Arc::new(FakePermissions::denied()),
        ..FakePlatform::with_paired(paired())
    };
    let manager = PrinterManager::start(ManagerConfig::default(), fakes.platform()).expect("start");
    assert_eq!(manager.get_state(), BluetoothState::Unavailable);

    // The request is answered later, so subscribing starts nothing yet.
    let mut subscription = manager.subscribe().expect("subscribe");
    assert_eq!(fakes.permissions.requests(), 1);
    assert_eq!(fakes.adapter.scans_started(), 0);

    assert_eq!(
        manager.permission_result(false),
        DiscoveryOutcome::PermissionMissing
    );
    assert_eq!(next(&mut subscription).await, Event::PermissionDenied);
    assert_eq!(Event::PermissionDenied.to_record()["code"], 3);

    fakes.permissions.set_status(PermissionStatus::Granted);
    assert_eq!(
        manager.permission_result(true),
        DiscoveryOutcome::Started { paired: 2 }
    );
    assert_eq!(fakes.adapter.scans_started(), 1);
    assert_eq!(next(&mut subscription).await.code(), Some(4));
}

#[tokio::test]
async fn test_permission_granted_while_radio_off() {
    let fakes = FakePlatform::new();
    fakes.adapter.set_enabled(false);
    let manager = PrinterManager::start(ManagerConfig::default(), fakes.platform()).expect("start");
    let mut subscription = manager.subscribe().expect("subscribe");

    assert_eq!(manager.permission_result(true), DiscoveryOutcome::RadioOff);
    assert_eq!(next(&mut subscription).await, Event::RadioDisabled);
}
