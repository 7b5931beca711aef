//! Client-side helpers: build the frames a SPDY client would send and decode
//! what the gateway writes back.

#![allow(dead_code)]

use std::net::IpAddr;

use spdy_gateway::spdy_codec::{
    control_type, create_data_frame, create_rst_stream, flags, FrameHeader, GoAway, RstStream,
    SynReply, SynStream,
};
use spdy_gateway::{
    Command, FrameDemuxer, FrameKind, Gateway, GatewayConfig, HeaderCompressor,
    HeaderDecompressor, KeyValueBlock, SessionId, StreamEvent, StreamKey,
};

pub fn get_request(hostport: &str, path: &str) -> KeyValueBlock {
    request("GET", hostport, path)
}

pub fn request(method: &str, hostport: &str, path: &str) -> KeyValueBlock {
    let mut block = KeyValueBlock::new();
    block.url.method = method.into();
    block.url.scheme = "http".into();
    block.url.hostport = hostport.into();
    block.url.path = path.into();
    block.url.version = "HTTP/1.1".into();
    block.insert("accept", "*/*");
    block
}

/// The client end of a connection, with its own deflate context.
pub struct Client {
    pub version: u16,
    compressor: HeaderCompressor,
}

impl Client {
    pub fn new(version: u16) -> Self {
        Self {
            version,
            compressor: HeaderCompressor::new(),
        }
    }

    pub fn syn_stream(&mut self, stream_id: u32, fin: bool, block: &KeyValueBlock) -> Vec<u8> {
        let headers = self.compressor.encode(self.version, block).unwrap();
        let datalen = (SynStream::SIZE + headers.len()) as u32;
        let frame_flags = if fin { flags::FIN } else { 0 };

        let mut frame = vec![0u8; FrameHeader::SIZE + SynStream::SIZE];
        FrameHeader::control(self.version, control_type::SYN_STREAM, frame_flags, datalen)
            .marshall(&mut frame)
            .unwrap();
        SynStream {
            stream_id,
            associated_id: 0,
            priority: 0,
        }
        .marshall(&mut frame[FrameHeader::SIZE..])
        .unwrap();
        frame.extend_from_slice(&headers);
        frame
    }

    /// A HEADERS frame; the gateway never acts on it but must inflate it.
    pub fn headers(&mut self, stream_id: u32, block: &KeyValueBlock) -> Vec<u8> {
        let headers = self.compressor.encode(self.version, block).unwrap();
        let prefix = SynReply::size(self.version);
        let datalen = (prefix + headers.len()) as u32;

        let mut frame = vec![0u8; FrameHeader::SIZE + prefix];
        FrameHeader::control(self.version, control_type::HEADERS, 0, datalen)
            .marshall(&mut frame)
            .unwrap();
        SynReply { stream_id }
            .marshall(self.version, &mut frame[FrameHeader::SIZE..])
            .unwrap();
        frame.extend_from_slice(&headers);
        frame
    }

    pub fn rst_stream(&self, stream_id: u32, status: u32) -> Vec<u8> {
        create_rst_stream(self.version, stream_id, status).unwrap()
    }

    pub fn data(&self, stream_id: u32, fin: bool, payload: &[u8]) -> Vec<u8> {
        let frame_flags = if fin { flags::FIN } else { 0 };
        create_data_frame(stream_id, frame_flags, payload).unwrap()
    }

    pub fn control(&self, frame_type: u16, payload: &[u8]) -> Vec<u8> {
        let header = FrameHeader::control(self.version, frame_type, 0, payload.len() as u32);
        let mut frame = header.to_bytes().unwrap().to_vec();
        frame.extend_from_slice(payload);
        frame
    }
}

/// A frame written by the gateway, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    SynReply { stream_id: u32, block: KeyValueBlock },
    RstStream { stream_id: u32, status: u32 },
    GoAway { last_stream_id: u32, status: u32 },
    Data { stream_id: u32, fin: bool, payload: Vec<u8> },
}

/// Reads the gateway's output with a client-side inflate context.
#[derive(Default)]
pub struct Reader {
    demux: FrameDemuxer,
    decompressor: HeaderDecompressor,
}

impl Reader {
    pub fn read(&mut self, bytes: &[u8]) -> Vec<Received> {
        self.demux
            .process(bytes)
            .unwrap()
            .into_iter()
            .map(|frame| match frame.header.kind {
                FrameKind::Control {
                    version,
                    frame_type: control_type::SYN_REPLY,
                } => {
                    let reply = SynReply::parse(version, &frame.payload).unwrap();
                    let block = self
                        .decompressor
                        .decode(version, &frame.payload[SynReply::size(version)..])
                        .unwrap();
                    Received::SynReply {
                        stream_id: reply.stream_id,
                        block,
                    }
                }
                FrameKind::Control {
                    frame_type: control_type::RST_STREAM,
                    ..
                } => {
                    let rst = RstStream::parse(&frame.payload).unwrap();
                    Received::RstStream {
                        stream_id: rst.stream_id,
                        status: rst.status_code,
                    }
                }
                FrameKind::Control {
                    frame_type: control_type::GOAWAY,
                    ..
                } => {
                    let goaway = GoAway::parse(&frame.payload).unwrap();
                    Received::GoAway {
                        last_stream_id: goaway.last_stream_id,
                        status: goaway.status_code,
                    }
                }
                FrameKind::Control { frame_type, .. } => {
                    panic!("gateway wrote unexpected control frame {frame_type}")
                }
                FrameKind::Data { stream_id } => Received::Data {
                    stream_id,
                    fin: frame.header.is_fin(),
                    payload: frame.payload.to_vec(),
                },
            })
            .collect()
    }
}

/// A gateway with one accepted session and a client talking to it.
pub struct Harness {
    pub gateway: Gateway,
    pub session: SessionId,
    pub client: Client,
    pub reader: Reader,
}

impl Harness {
    pub fn new(version: u16) -> Self {
        Self::with_config(version, GatewayConfig::default())
    }

    pub fn with_config(version: u16, config: GatewayConfig) -> Self {
        let mut gateway = Gateway::new(config);
        let session = gateway.accept();
        Self {
            gateway,
            session,
            client: Client::new(version),
            reader: Reader::default(),
        }
    }

    pub fn key(&self, stream_id: u32) -> StreamKey {
        StreamKey::new(self.session, stream_id)
    }

    pub fn send(&mut self, bytes: &[u8]) {
        self.gateway.receive(self.session, bytes).unwrap();
    }

    pub fn open(&mut self, stream_id: u32, block: &KeyValueBlock) {
        let frame = self.client.syn_stream(stream_id, true, block);
        self.send(&frame);
    }

    pub fn event(&mut self, event: StreamEvent) {
        self.gateway.handle_event(event).unwrap();
    }

    pub fn resolve(&mut self, stream_id: u32, ip: &str) {
        let ip: IpAddr = ip.parse().unwrap();
        self.event(StreamEvent::Resolved {
            stream: self.key(stream_id),
            result: Ok(ip),
        });
    }

    pub fn origin_data(&mut self, stream_id: u32, data: &[u8]) {
        self.event(StreamEvent::OriginData {
            stream: self.key(stream_id),
            data: bytes::Bytes::copy_from_slice(data),
        });
    }

    pub fn frames(&mut self) -> Vec<Received> {
        let output = self.gateway.take_output(self.session);
        self.reader.read(&output)
    }

    pub fn commands(&mut self) -> Vec<Command> {
        self.gateway.take_commands(self.session)
    }

    /// Open a GET stream and walk it to the point where it waits for the
    /// origin's response.
    pub fn open_to_origin(&mut self, stream_id: u32) {
        self.open(stream_id, &get_request("example.com", "/"));
        self.resolve(stream_id, "192.0.2.10");
        self.event(StreamEvent::OriginWritable {
            stream: self.key(stream_id),
        });
        self.commands();
    }
}
