//! Unit tests for observer hooks and error mapping.

use mockall::mock;
use p2pd_config::MuxConfig;
use p2pd_types::{CallId, MalformedCallId, ProtocolId, Response};
use rstest::rstest;

use super::support::{answer, forwarded, start_with_observer};
use crate::registry::RegistryError;
use crate::{CloseReason, DispatchObserver, MuxError, RejectReason};

mock! {
    Observer {}
    impl DispatchObserver for Observer {
        fn request_routed(&self, protocol: &ProtocolId);
        fn request_rejected(&self, protocol: &ProtocolId, reason: RejectReason);
        fn response_routed(&self, call_id: CallId);
        fn response_discarded(&self, call_id: CallId);
        fn malformed_call_id(&self, error: &MalformedCallId);
        fn unrecognised_message(&self, message: &Response);
        fn connection_closed(&self, reason: &CloseReason);
    }
}

/// Expects exactly one closure caused by the daemon hanging up.
fn expect_end_of_stream(observer: &mut MockObserver) {
    observer
        .expect_connection_closed()
        .withf(|reason| *reason == CloseReason::EndOfStream)
        .times(1)
        .return_const(());
}

#[rstest]
fn malformed_identifier_is_reported_once_then_routing_resumes() {
    let call_id = CallId::new_v4();
    let mut observer = MockObserver::new();
    observer
        .expect_malformed_call_id()
        .withf(|error| error.length() == 5)
        .times(1)
        .return_const(());
    observer
        .expect_response_routed()
        .withf(move |routed| *routed == call_id)
        .times(1)
        .return_const(());
    expect_end_of_stream(&mut observer);

    let (mux, daemon, _written) = start_with_observer(MuxConfig::default(), observer);
    let pending = mux.expect_response(call_id).expect("register");
    daemon.send(&Response::call_unary_response(vec![0; 5], Ok(Vec::new())));
    daemon.send(&answer(call_id, &[1]));
    pending.wait().expect("answer");

    drop(daemon);
    mux.join().expect("dispatch loop");
}

#[rstest]
fn unknown_protocol_is_rejected_as_unsupported() {
    let mut observer = MockObserver::new();
    observer
        .expect_request_rejected()
        .withf(|protocol, reason| {
            protocol.as_str() == "missing" && *reason == RejectReason::Unsupported
        })
        .times(1)
        .return_const(());
    observer.expect_request_routed().never();
    expect_end_of_stream(&mut observer);

    let (mux, daemon, written) = start_with_observer(MuxConfig::default(), observer);
    daemon.send(&forwarded("missing", CallId::new_v4(), b""));
    drop(daemon);
    mux.join().expect("dispatch loop");

    assert_eq!(written.requests().len(), 1);
}

#[rstest]
fn messages_without_routing_data_are_reported() {
    let mut observer = MockObserver::new();
    observer
        .expect_unrecognised_message()
        .times(2)
        .return_const(());
    expect_end_of_stream(&mut observer);

    let (mux, daemon, written) = start_with_observer(MuxConfig::default(), observer);
    daemon.send(&Response::default());
    daemon.send(&Response::error("no such peer"));
    drop(daemon);
    mux.join().expect("dispatch loop");

    assert!(written.requests().is_empty());
}

#[rstest]
fn shutdown_reports_local_closure_once() {
    let mut observer = MockObserver::new();
    observer
        .expect_connection_closed()
        .withf(|reason| *reason == CloseReason::LocalShutdown)
        .times(1)
        .return_const(());

    let (mux, daemon, _written) = start_with_observer(MuxConfig::default(), observer);
    mux.shutdown();
    drop(daemon);
    mux.join().expect("dispatch loop");
}

#[rstest]
fn invalid_configuration_is_rejected_before_starting() {
    let config = MuxConfig::default().with_dispatch_workers(0);

    let error = crate::Multiplexer::from_halves(std::io::empty(), std::io::sink(), &config)
        .err()
        .expect("configuration must be rejected");

    assert!(matches!(error, MuxError::Config(_)));
}

#[rstest]
#[case::closed(RegistryError::Closed, "connection closed")]
#[case::occupied(RegistryError::Occupied, "is already awaited")]
#[case::full(RegistryError::Full { capacity: 4 }, "too many pending calls (limit 4)")]
fn call_registry_errors_map_to_mux_errors(#[case] error: RegistryError, #[case] expected: &str) {
    let mapped = MuxError::from_call_registry(error, CallId::new_v4());
    assert!(mapped.to_string().contains(expected));
}

#[rstest]
#[case(CloseReason::EndOfStream, "end of stream")]
#[case(CloseReason::LocalShutdown, "local shutdown")]
#[case(CloseReason::ReadFailed { error: "boom".to_owned() }, "read failed: boom")]
fn close_reasons_render_for_logs(#[case] reason: CloseReason, #[case] expected: &str) {
    assert_eq!(reason.to_string(), expected);
}
