mod common;

use std::io;

use common::*;
use configver_lib::config::ManagerConfig;
use configver_lib::device::SerialEvent;
use configver_lib::serial::PortErrorKind;

fn ports_changed(events: &[SerialEvent]) -> Vec<Vec<String>> {
    events
        .iter()
        .filter_map(|e| match e {
            SerialEvent::PortsChanged { ports } => Some(ports.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_identical_scans_notify_once() {
    let backend = MockBackend::with_ports(&["COM3", "COM5"]);
    let mut manager = manager_with(&backend, test_config());
    let mut rx = manager.subscribe();

    manager.scan_tick();
    manager.scan_tick();

    assert_eq!(
        ports_changed(&drain(&mut rx)),
        vec![vec!["COM3".to_string(), "COM5".to_string()]]
    );

    backend.set_ports(&["COM3"]);
    manager.scan_tick();
    assert_eq!(ports_changed(&drain(&mut rx)), vec![vec!["COM3".to_string()]]);
}

#[test]
fn test_user_close_disables_reconnect() {
    let backend = MockBackend::with_ports(&["COM5"]);
    let mut manager = manager_with(&backend, test_config());
    manager.open("COM5", None).expect("open");
    manager.close(true);

    manager.scan_tick();
    manager.scan_tick();

    assert!(!manager.is_connected());
    assert_eq!(backend.open_count(), 1);
}

#[test]
fn test_device_loss_then_reappearance_reconnects() {
    let backend = MockBackend::with_ports(&["COM5"]);
    let mut manager = manager_with(&backend, test_config());
    manager.open("COM5", None).expect("open");
    let mut rx = manager.subscribe();

    backend.set_ports(&[]);
    manager.handle_error(PortErrorKind::ResourceError);

    assert!(!manager.is_connected());
    assert_eq!(manager.get_port_name(), "COM5");
    assert!(manager.is_scanning());
    let events = drain(&mut rx);
    assert_eq!(errors(&events), vec!["Port disconnected".to_string()]);
    assert_eq!(connection_changes(&events), vec![(false, "COM5".to_string())]);

    // Port still missing: nothing to reopen
    manager.scan_tick();
    assert!(!manager.is_connected());
    assert_eq!(backend.open_count(), 1);

    backend.set_ports(&["COM5"]);
    manager.scan_tick();
    assert!(manager.is_connected());
    assert_eq!(backend.open_count(), 2);
    assert!(!manager.is_scanning());
    assert_eq!(connection_changes(&drain(&mut rx)), vec![(true, "COM5".to_string())]);
}

#[test]
fn test_device_not_found_also_closes() {
    let backend = MockBackend::with_ports(&["COM5"]);
    let mut manager = manager_with(&backend, test_config());
    manager.open("COM5", None).expect("open");

    manager.handle_error(PortErrorKind::DeviceNotFound);

    assert!(!manager.is_connected());
    assert_eq!(manager.get_port_name(), "COM5");
}

#[test]
fn test_reconnect_disabled_by_config() {
    let backend = MockBackend::with_ports(&["COM5"]);
    let mut manager = manager_with(&backend, ManagerConfig::new(2000, false));
    manager.open("COM5", None).expect("open");
    manager.handle_error(PortErrorKind::ResourceError);

    manager.scan_tick();

    assert!(!manager.is_connected());
    assert_eq!(manager.get_port_name(), "COM5");
    assert_eq!(backend.open_count(), 1);
}

#[test]
fn test_failed_reconnect_retries_next_tick() {
    let backend = MockBackend::with_ports(&["COM5"]);
    let mut manager = manager_with(&backend, test_config());
    manager.open("COM5", None).expect("open");
    manager.handle_error(PortErrorKind::ResourceError);
    let mut rx = manager.subscribe();

    backend.update(|s| s.open_error = Some(io::ErrorKind::PermissionDenied));
    manager.scan_tick();
    assert!(!manager.is_connected());
    assert_eq!(
        errors(&drain(&mut rx)),
        vec!["Could not open COM5: Permission denied".to_string()]
    );
    assert!(manager.is_scanning());

    backend.update(|s| s.open_error = None);
    manager.scan_tick();
    assert!(manager.is_connected());
}

#[test]
fn test_transient_errors_keep_connection() {
    let backend = MockBackend::with_ports(&["COM5"]);
    let mut manager = manager_with(&backend, test_config());
    manager.open("COM5", None).expect("open");
    let mut rx = manager.subscribe();

    manager.handle_error(PortErrorKind::NoError);
    manager.handle_error(PortErrorKind::Timeout);
    manager.handle_error(PortErrorKind::Unknown(7));

    assert!(manager.is_connected());
    assert_eq!(
        errors(&drain(&mut rx)),
        vec!["Timeout".to_string(), "Unknown error (7)".to_string()]
    );
}

#[test]
fn test_errors_after_close_are_ignored() {
    let backend = MockBackend::with_ports(&["COM5"]);
    let mut manager = manager_with(&backend, test_config());
    manager.open("COM5", None).expect("open");
    manager.close(true);
    let mut rx = manager.subscribe();

    manager.handle_error(PortErrorKind::ResourceError);

    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_read_failure_from_unplugged_device_closes() {
    let backend = MockBackend::with_ports(&["COM5"]);
    let mut manager = manager_with(&backend, test_config());
    manager.open("COM5", None).expect("open");
    let mut rx = manager.subscribe();

    backend.update(|s| s.read_error = Some(io::ErrorKind::BrokenPipe));
    manager.poll_incoming();

    assert!(!manager.is_connected());
    assert_eq!(manager.get_port_name(), "COM5");
    let events = drain(&mut rx);
    assert_eq!(errors(&events), vec!["Port disconnected".to_string()]);
}

#[test]
fn test_timer_rearms_on_tick_and_stops_on_open() {
    let backend = MockBackend::with_ports(&[]);
    let mut manager = manager_with(&backend, test_config());
    let first_due = manager.next_scan_due().expect("armed");

    manager.on_scan_timer();
    let second_due = manager.next_scan_due().expect("still armed");
    assert!(second_due >= first_due);

    manager.open("COM5", None).expect("open");
    assert_eq!(manager.next_scan_due(), None);
}

#[test]
fn test_port_info_lookup() {
    let backend = MockBackend::with_ports(&["COM3", "COM5"]);
    let manager = manager_with(&backend, test_config());

    let info = manager.get_port_info("COM5").expect("present");
    assert_eq!(info.port_name, "COM5");
    assert_eq!(info.description.as_deref(), Some("Mock device on COM5"));
    assert_eq!(info.vendor_id, Some(0x1A86));
    assert_eq!(info.system_location.as_deref(), Some("/dev/COM5"));

    assert!(manager.get_port_info("COM9").is_none());
    assert_eq!(manager.get_list_ports(), vec!["COM3".to_string(), "COM5".to_string()]);
}
