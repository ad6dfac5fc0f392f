//! Property: whatever sequence of commands and read faults runs, a session
//! never has more than one background reader, an open session always has
//! its reader and handle, and a dead reader never leaves the session open.

mod common;

use common::{mock_session, runtime, wait_until};
use proptest::prelude::*;
use usb_serial_bridge::port::DriverOp;

#[derive(Debug, Clone)]
enum Step {
    Open,
    Close,
    FailNextOpen,
    FailRead,
    Write(Vec<u8>),
    Inbound(Vec<u8>),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Open),
        3 => Just(Step::Close),
        1 => Just(Step::FailNextOpen),
        1 => Just(Step::FailRead),
        2 => prop::collection::vec(any::<u8>(), 0..8).prop_map(Step::Write),
        2 => prop::collection::vec(any::<u8>(), 1..8).prop_map(Step::Inbound),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn at_most_one_reader(steps in prop::collection::vec(step(), 1..24)) {
        let rt = runtime();
        let (session, mock) = mock_session(&rt, 0);

        for step in steps {
            match step {
                Step::Open => { let _ = session.open(); }
                Step::Close => { let _ = session.close(); }
                Step::FailNextOpen => mock.fail_next(DriverOp::Open),
                Step::FailRead => mock.fail_next(DriverOp::Read),
                Step::Write(data) => { let _ = session.write(&data); }
                Step::Inbound(data) => mock.push_read(&data),
            }

            // Readers first: a reader that is gone by the time `is_open`
            // answers true would have to have faulted, which `is_open` sees.
            let readers = session.active_readers();
            let open = session.is_open();
            prop_assert!(readers <= 1);
            if open {
                prop_assert_eq!(readers, 1);
                prop_assert!(mock.is_handle_open());
            }
            prop_assert!(wait_until(|| {
                session.active_readers() == usize::from(session.is_open())
            }), "active reader count did not settle to match is_open");
        }

        session.close().unwrap();
        prop_assert_eq!(session.active_readers(), 0);
        prop_assert!(!mock.is_handle_open());
        prop_assert_eq!(mock.reads_while_closed(), 0);
    }
}
