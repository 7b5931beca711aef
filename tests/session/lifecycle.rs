use spdy_gateway::spdy_codec::status_code;
use spdy_gateway::{Command, Phase, SpdyError, StreamEvent, StreamKey, StreamState};

use super::support::{get_request, Harness};

#[test]
fn test_rst_during_resolution_cancels_lookup() {
    let mut h = Harness::new(3);
    h.open(1, &get_request("example.com", "/"));
    h.commands();

    let rst = h.client.rst_stream(1, status_code::CANCEL);
    h.send(&rst);
    assert_eq!(h.commands(), vec![Command::CancelResolve { stream: h.key(1) }]);
    assert!(h.frames().is_empty());

    // The lookup finished anyway; nothing may happen for stream 1.
    h.resolve(1, "192.0.2.1");
    assert!(h.frames().is_empty());
    assert!(h.commands().is_empty());
    assert_eq!(h.gateway.session(h.session).unwrap().stream_count(), 0);
}

#[test]
fn test_rst_during_content_closes_origin() {
    let mut h = Harness::new(3);
    h.open_to_origin(1);
    h.origin_data(1, b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial");
    h.frames();

    let rst = h.client.rst_stream(1, status_code::CANCEL);
    h.send(&rst);
    assert_eq!(h.commands(), vec![Command::CloseOrigin { stream: h.key(1) }]);

    h.origin_data(1, b"more body");
    h.event(StreamEvent::OriginEof { stream: h.key(1) });
    assert!(h.frames().is_empty());
}

#[test]
fn test_rst_for_unknown_stream() {
    let mut h = Harness::new(3);
    let rst = h.client.rst_stream(9, status_code::CANCEL);
    h.send(&rst);
    assert!(h.frames().is_empty());
    assert!(h.commands().is_empty());
}

#[test]
fn test_phases_follow_the_exchange() {
    let mut h = Harness::new(3);
    h.open(1, &get_request("example.com", "/"));
    let phase = |h: &Harness| h.gateway.session(h.session).unwrap().stream_phase(1);

    assert_eq!(phase(&h), Some(Phase::ResolvingHost));
    assert_eq!(
        h.gateway.session(h.session).unwrap().stream_state(1),
        Some(StreamState::Open)
    );

    h.resolve(1, "192.0.2.1");
    assert_eq!(phase(&h), Some(Phase::SendingHeaders));

    h.event(StreamEvent::OriginWritable { stream: h.key(1) });
    assert_eq!(phase(&h), Some(Phase::ReceivingHeaders));

    h.origin_data(1, b"HTTP/1.1 200 OK\r\n\r\n");
    assert_eq!(phase(&h), Some(Phase::ReceivingContent));

    h.event(StreamEvent::OriginEof { stream: h.key(1) });
    assert_eq!(phase(&h), None);
}

#[test]
fn test_event_out_of_phase_dropped() {
    let mut h = Harness::new(3);
    h.open(1, &get_request("example.com", "/"));
    h.commands();

    h.origin_data(1, b"HTTP/1.1 200 OK\r\n\r\n");
    h.event(StreamEvent::OriginEof { stream: h.key(1) });
    assert!(h.frames().is_empty());
    assert_eq!(
        h.gateway.session(h.session).unwrap().stream_phase(1),
        Some(Phase::ResolvingHost)
    );
}

#[test]
fn test_event_for_other_session_dropped() {
    let mut h = Harness::new(3);
    h.open(1, &get_request("example.com", "/"));
    h.commands();

    let other = h.gateway.accept();
    h.event(StreamEvent::Resolved {
        stream: StreamKey::new(other, 1),
        result: Ok("192.0.2.1".parse().unwrap()),
    });
    assert!(h.gateway.take_commands(other).is_empty());
    assert!(h.commands().is_empty());
    assert_eq!(
        h.gateway.session(h.session).unwrap().stream_phase(1),
        Some(Phase::ResolvingHost)
    );
}

#[test]
fn test_close_cancels_pending_work() {
    let mut h = Harness::new(3);
    h.open(1, &get_request("example.com", "/"));
    h.open_to_origin(3);
    h.commands();

    let cancelled = h.gateway.close(h.session);
    assert_eq!(
        cancelled,
        vec![
            Command::CancelResolve { stream: h.key(1) },
            Command::CloseOrigin { stream: h.key(3) },
        ]
    );
    assert!(h.gateway.session(h.session).is_none());

    // Late completions for the dead session are harmless.
    h.event(StreamEvent::OriginEof { stream: h.key(3) });
    assert_eq!(
        h.gateway.receive(h.session, b"x").unwrap_err(),
        SpdyError::SessionClosed
    );
}

#[test]
fn test_closed_session_rejects_input() {
    let mut h = Harness::new(3);
    let session = h.gateway.session_mut(h.session).unwrap();
    session.close();
    assert!(session.is_closed());
    assert_eq!(session.receive(b"x").unwrap_err(), SpdyError::SessionClosed);
}
