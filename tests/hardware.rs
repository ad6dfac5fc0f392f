//! Tests against a real USB serial device.
//!
//! ```bash
//! export USB_SERIAL_BRIDGE_TEST_PORT=/dev/ttyUSB0   # or COM3
//! export USB_SERIAL_BRIDGE_TEST_LOOPBACK=1          # if TX and RX are bridged
//! cargo test --features hardware-tests -- --ignored
//! ```

#![cfg(feature = "hardware-tests")]

mod common;

use common::{fast_options, runtime, subscribe, wait_until, RecordingSink};
use std::env;
use usb_serial_bridge::port::{LineParameters, SystemSerialDriver};
use usb_serial_bridge::{DeliveryContext, PortSession};

fn test_port() -> Option<String> {
    let port = env::var("USB_SERIAL_BRIDGE_TEST_PORT").ok();
    if port.is_none() {
        println!("Skipping hardware test: USB_SERIAL_BRIDGE_TEST_PORT not set");
    }
    port
}

fn session(rt: &tokio::runtime::Runtime, port: String) -> PortSession {
    PortSession::new(
        0,
        SystemSerialDriver::new(port, LineParameters::default()),
        DeliveryContext::spawn(rt.handle()),
        fast_options(),
    )
}

#[test]
#[ignore]
fn real_port_open_close_cycles() {
    let Some(port) = test_port() else { return };
    let rt = runtime();
    let session = session(&rt, port);

    for _ in 0..3 {
        session.open().unwrap();
        session.set_dtr(true).unwrap();
        session.set_rts(true).unwrap();
        session.close().unwrap();
        assert_eq!(session.active_readers(), 0);
    }
}

#[test]
#[ignore]
fn real_port_loopback_echo() {
    let Some(port) = test_port() else { return };
    if env::var("USB_SERIAL_BRIDGE_TEST_LOOPBACK").ok().as_deref() != Some("1") {
        println!("Skipping loopback test: USB_SERIAL_BRIDGE_TEST_LOOPBACK not set");
        return;
    }
    let rt = runtime();
    let session = session(&rt, port);
    let sink = RecordingSink::new();
    let _sub = subscribe(&session, &sink);

    session.open().unwrap();
    let mut sent = 0;
    while sent < 5 {
        sent += session.write(&b"hello"[sent..]).unwrap();
    }
    assert!(wait_until(|| sink.data().ends_with(b"hello")));
    session.close().unwrap();
}
