use spdy_gateway::spdy_codec::{control_type, status_code};
use spdy_gateway::{
    Command, ErrorKind, FrameHeader, GatewayConfig, SpdyError, SynStream,
};

use super::support::{get_request, request, Client, Harness, Received};

fn conversation() -> Vec<u8> {
    let mut client = Client::new(3);
    let mut bytes = client.syn_stream(1, true, &get_request("example.com", "/"));
    bytes.extend(client.syn_stream(3, true, &request("POST", "example.com", "/form")));
    bytes.extend(client.control(control_type::PING, &[0, 0, 0, 1]));
    bytes.extend(client.syn_stream(5, false, &get_request("example.org:8080", "/a")));
    bytes.extend(client.data(5, true, b"body"));
    bytes
}

#[test]
fn test_reassembly_independent_of_chunking() {
    let bytes = conversation();

    let mut whole = Harness::new(3);
    whole.send(&bytes);

    let mut bytewise = Harness::new(3);
    for byte in &bytes {
        bytewise.send(std::slice::from_ref(byte));
    }

    let commands = whole.commands();
    assert_eq!(commands, bytewise.commands());
    assert_eq!(
        commands,
        vec![
            Command::Resolve {
                stream: whole.key(1),
                host: "example.com".into()
            },
            Command::Resolve {
                stream: whole.key(5),
                host: "example.org".into()
            },
        ]
    );

    let frames = whole.frames();
    assert_eq!(frames, bytewise.frames());
    assert_eq!(frames.len(), 2);
    assert!(matches!(
        &frames[0],
        Received::SynReply { stream_id: 3, block } if block.get(":status") == Some("405 Method Not Allowed")
    ));
}

#[test]
fn test_threshold_tracks_partial_frame() {
    let mut h = Harness::new(3);
    let frame = h.client.data(9, false, b"0123456789");

    h.send(&frame[..3]);
    assert_eq!(h.gateway.session(h.session).unwrap().threshold(), FrameHeader::SIZE);

    h.send(&frame[3..12]);
    assert_eq!(h.gateway.session(h.session).unwrap().threshold(), frame.len());

    h.send(&frame[12..]);
    assert_eq!(h.gateway.session(h.session).unwrap().threshold(), FrameHeader::SIZE);
}

#[test]
fn test_stream_id_must_increase() {
    let mut h = Harness::new(3);
    h.open(3, &get_request("example.com", "/"));
    h.commands();

    for stale in [1, 3] {
        h.open(stale, &get_request("example.com", "/"));
        assert_eq!(
            h.frames(),
            vec![Received::RstStream {
                stream_id: stale,
                status: status_code::PROTOCOL_ERROR
            }]
        );
        assert!(h.commands().is_empty());
    }

    let session = h.gateway.session(h.session).unwrap();
    assert_eq!(session.stream_count(), 1);
    assert_eq!(session.last_stream_id(), 3);
}

#[test]
fn test_even_stream_id_rejected() {
    let mut h = Harness::new(3);
    h.open(2, &get_request("example.com", "/"));
    assert_eq!(
        h.frames(),
        vec![Received::RstStream {
            stream_id: 2,
            status: status_code::PROTOCOL_ERROR
        }]
    );
    assert_eq!(h.gateway.session(h.session).unwrap().stream_count(), 0);

    // The rejected block was still inflated, so the next stream decodes.
    h.open(5, &get_request("example.com", "/"));
    assert_eq!(h.commands().len(), 1);
}

#[test]
fn test_unsupported_version_reset() {
    let mut h = Harness::new(3);
    let mut frame = h.client.syn_stream(1, true, &get_request("example.com", "/"));
    frame[1] = 4;

    h.send(&frame);
    assert_eq!(
        h.frames(),
        vec![Received::RstStream {
            stream_id: 1,
            status: status_code::PROTOCOL_ERROR
        }]
    );
    assert!(h.commands().is_empty());
    assert!(!h.gateway.session(h.session).unwrap().is_closed());
}

#[test]
fn test_ignored_control_frames() {
    let mut h = Harness::new(3);
    let mut bytes = h.client.control(control_type::SETTINGS, &[0, 0, 0, 0]);
    bytes.extend(h.client.control(control_type::NOOP, &[]));
    bytes.extend(h.client.control(control_type::WINDOW_UPDATE, &[0, 0, 0, 1, 0, 0, 1, 0]));
    bytes.extend(h.client.control(control_type::GOAWAY, &[0, 0, 0, 0, 0, 0, 0, 0]));
    bytes.extend(h.client.control(0x20, b"whatever"));
    h.send(&bytes);

    assert!(h.frames().is_empty());
    assert!(h.commands().is_empty());

    h.open(1, &get_request("example.com", "/"));
    assert_eq!(h.commands().len(), 1);
}

#[test]
fn test_headers_frame_keeps_inflate_context_in_step() {
    let mut h = Harness::new(3);
    let headers = h.client.headers(1, &get_request("ignored.example", "/x"));
    h.send(&headers);
    assert!(h.frames().is_empty());

    h.open(1, &get_request("example.com", "/"));
    assert_eq!(
        h.commands(),
        vec![Command::Resolve {
            stream: h.key(1),
            host: "example.com".into()
        }]
    );
}

#[test]
fn test_data_for_unknown_stream_ignored() {
    let mut h = Harness::new(3);
    let frame = h.client.data(7, true, b"stray");
    h.send(&frame);
    assert!(h.frames().is_empty());
    assert!(h.commands().is_empty());
}

#[test]
fn test_oversized_frame_closes_session() {
    let config = GatewayConfig::builder().max_frame_length(32).build();
    let mut h = Harness::with_config(3, config);

    let mut frame = FrameHeader::data(1, 0, 33).to_bytes().unwrap().to_vec();
    frame.extend_from_slice(&[0u8; 33]);

    let err = h.gateway.receive(h.session, &frame).unwrap_err();
    assert_eq!(err, SpdyError::FrameTooLarge { length: 33, max: 32 });
    assert_eq!(
        h.frames(),
        vec![Received::GoAway {
            last_stream_id: 0,
            status: status_code::PROTOCOL_ERROR
        }]
    );
    assert!(h.commands().is_empty());

    let session = h.gateway.session(h.session).unwrap();
    assert!(session.is_closed());
    assert_eq!(session.stream_count(), 0);

    let err = h.gateway.receive(h.session, b"more").unwrap_err();
    assert_eq!(err, SpdyError::SessionClosed);
}

#[test]
fn test_oversized_frame_after_valid_stream() {
    let config = GatewayConfig::builder().max_frame_length(256).build();
    let mut h = Harness::with_config(3, config);
    h.open(1, &get_request("example.com", "/"));
    h.commands();

    let mut frame = FrameHeader::data(1, 0, 300).to_bytes().unwrap().to_vec();
    frame.extend_from_slice(&[0u8; 300]);
    assert!(h.gateway.receive(h.session, &frame).is_err());

    // The open stream is torn down with its resolution cancelled.
    assert_eq!(h.commands(), vec![Command::CancelResolve { stream: h.key(1) }]);
    assert_eq!(
        h.frames(),
        vec![Received::GoAway {
            last_stream_id: 1,
            status: status_code::PROTOCOL_ERROR
        }]
    );
}

#[test]
fn test_corrupt_header_block_is_fatal() {
    let mut h = Harness::new(3);
    let body = b"definitely not zlib";
    let datalen = (SynStream::SIZE + body.len()) as u32;
    let mut frame = FrameHeader::control(3, control_type::SYN_STREAM, 0, datalen)
        .to_bytes()
        .unwrap()
        .to_vec();
    let mut prefix = [0u8; SynStream::SIZE];
    SynStream {
        stream_id: 1,
        ..Default::default()
    }
    .marshall(&mut prefix)
    .unwrap();
    frame.extend_from_slice(&prefix);
    frame.extend_from_slice(body);

    let err = h.gateway.receive(h.session, &frame).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Codec);
    assert!(h.gateway.session(h.session).unwrap().is_closed());
}

#[test]
fn test_truncated_rst_stream_is_fatal() {
    let mut h = Harness::new(3);
    let frame = h.client.control(control_type::RST_STREAM, &[0, 0, 0, 1]);

    let err = h.gateway.receive(h.session, &frame).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Framing);
}
