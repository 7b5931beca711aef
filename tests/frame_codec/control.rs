use spdy_gateway::spdy_codec::{create_goaway, create_rst_stream, status_code};
use spdy_gateway::{FrameHeader, GoAway, RstStream, SpdyError, SynReply, SynStream};

#[test]
fn test_syn_stream_layout() {
    let syn = SynStream {
        stream_id: 0x0102_0304,
        associated_id: 5,
        priority: 3,
    };
    let mut out = [0xAAu8; SynStream::SIZE];
    assert_eq!(syn.marshall(&mut out).unwrap(), 10);
    assert_eq!(out, [0x01, 0x02, 0x03, 0x04, 0, 0, 0, 5, 0x60, 0]);
    assert_eq!(SynStream::parse(&out).unwrap(), syn);
}

#[test]
fn test_syn_stream_clears_reserved_bits() {
    let syn = SynStream::parse(&[0xFF, 0xFF, 0xFF, 0xFF, 0x80, 0, 0, 1, 0xFF, 0xFF]).unwrap();
    assert_eq!(syn.stream_id, 0x7FFF_FFFF);
    assert_eq!(syn.associated_id, 1);
    assert_eq!(syn.priority, 7);
}

#[test]
fn test_syn_stream_too_short() {
    let err = SynStream::parse(&[0; 9]).unwrap_err();
    assert_eq!(
        err,
        SpdyError::Truncated {
            what: "SYN_STREAM",
            needed: 10,
            available: 9
        }
    );
}

#[test]
fn test_syn_reply_prefix_per_version() {
    let mut v2 = [0xFFu8; 6];
    SynReply { stream_id: 9 }.marshall(2, &mut v2).unwrap();
    assert_eq!(v2, [0, 0, 0, 9, 0, 0]);

    let mut v3 = [0xFFu8; 4];
    SynReply { stream_id: 9 }.marshall(3, &mut v3).unwrap();
    assert_eq!(v3, [0, 0, 0, 9]);

    assert!(SynReply::parse(2, &v3).is_err());
    assert_eq!(SynReply::parse(3, &v3).unwrap().stream_id, 9);
}

#[test]
fn test_rst_stream_frame() {
    let frame = create_rst_stream(2, 7, status_code::REFUSED_STREAM).unwrap();
    let header = FrameHeader::parse(&frame).unwrap();
    assert_eq!(header.datalen as usize, RstStream::SIZE);

    let rst = RstStream::parse(&frame[FrameHeader::SIZE..]).unwrap();
    assert_eq!(rst.stream_id, 7);
    assert_eq!(rst.status_code, status_code::REFUSED_STREAM);
}

#[test]
fn test_goaway_frame() {
    let frame = create_goaway(3, 11, 1).unwrap();
    assert_eq!(frame.len(), FrameHeader::SIZE + GoAway::SIZE);
    assert_eq!(
        GoAway::parse(&frame[FrameHeader::SIZE..]).unwrap(),
        GoAway {
            last_stream_id: 11,
            status_code: 1
        }
    );
}
