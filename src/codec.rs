//! LIFX LAN protocol packets.
//!
//! Every packet is a fixed 36-byte header followed by a payload whose layout
//! depends on the message type. All multi-byte fields are little-endian.
//!
//! ```text
//!  0..2   size             total packet size in bytes
//!  2..4   origin:2 tagged:1 addressable:1 protocol:12
//!  4..8   source           client identifier echoed by replies
//!  8..16  target           6-byte MAC + 2 zero bytes, all zero = every device
//! 16..22  reserved
//! 22      reserved:6 ack_required:1 res_required:1
//! 23      sequence
//! 24..32  reserved
//! 32..34  message type
//! 34..36  reserved
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::errors::DecodeError;
use crate::types::{DeviceId, Hsbk};

/// Size of the packet header in bytes.
pub const HEADER_SIZE: usize = 36;

/// The only protocol number LIFX devices speak.
pub const PROTOCOL: u16 = 1024;

/// UDP port LIFX devices listen on.
pub const DEFAULT_PORT: u16 = 56700;

/// Service number advertised in [`Message::StateService`] for the UDP API.
pub const SERVICE_UDP: u8 = 1;

const LABEL_SIZE: usize = 32;

/// Routing information carried by every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Set when `target` is unused and the packet addresses all devices.
    pub tagged: bool,
    /// Client identifier; devices copy it into their replies.
    pub source: u32,
    /// Addressed device, `None` for all devices.
    pub target: Option<DeviceId>,
    pub ack_required: bool,
    pub res_required: bool,
    /// Wrapping sequence number; devices copy it into their replies.
    pub sequence: u8,
}

impl Header {
    /// Header for a packet addressed to every device on the network.
    pub fn broadcast(source: u32, sequence: u8) -> Self {
        Header {
            tagged: true,
            source,
            target: None,
            ack_required: false,
            res_required: false,
            sequence,
        }
    }

    /// Header for a packet addressed to a single device.
    pub fn unicast(target: DeviceId, source: u32, sequence: u8) -> Self {
        Header {
            tagged: false,
            source,
            target: Some(target),
            ack_required: false,
            res_required: false,
            sequence,
        }
    }

    pub fn with_ack(mut self, ack_required: bool) -> Self {
        self.ack_required = ack_required;
        self
    }

    pub fn with_response(mut self, res_required: bool) -> Self {
        self.res_required = res_required;
        self
    }
}

/// Messages understood by this library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// GetService - 2. Discovery request, answered by `StateService`.
    GetService,
    /// StateService - 3. A port of 0 means the service is unavailable.
    StateService { service: u8, port: u32 },
    /// GetPower - 20
    GetPower,
    /// StatePower - 22
    StatePower { level: u16 },
    /// Acknowledgement - 45. Sent when `ack_required` was set.
    Acknowledgement,
    /// Get - 101. Answered by `LightState`.
    LightGet,
    /// SetColor - 102. `duration` is the transition time in milliseconds.
    LightSetColor { color: Hsbk, duration: u32 },
    /// State - 107
    LightState {
        color: Hsbk,
        power: u16,
        label: String,
    },
    /// GetPower - 116
    LightGetPower,
    /// SetPower - 117. `duration` is the transition time in milliseconds.
    LightSetPower { level: u16, duration: u32 },
    /// StatePower - 118
    LightStatePower { level: u16 },
}

impl Message {
    /// The protocol message type number.
    pub fn message_type(&self) -> u16 {
        match self {
            Message::GetService => 2,
            Message::StateService { .. } => 3,
            Message::GetPower => 20,
            Message::StatePower { .. } => 22,
            Message::Acknowledgement => 45,
            Message::LightGet => 101,
            Message::LightSetColor { .. } => 102,
            Message::LightState { .. } => 107,
            Message::LightGetPower => 116,
            Message::LightSetPower { .. } => 117,
            Message::LightStatePower { .. } => 118,
        }
    }

    /// Whether this message is sent by clients rather than devices.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::GetService
                | Message::GetPower
                | Message::LightGet
                | Message::LightSetColor { .. }
                | Message::LightGetPower
                | Message::LightSetPower { .. }
        )
    }

    /// Payload size for a message type, `None` for unknown types.
    fn payload_size(message_type: u16) -> Option<usize> {
        let size = match message_type {
            2 | 20 | 45 | 101 | 116 => 0,
            3 => 5,
            22 | 118 => 2,
            102 => 13,
            107 => 52,
            117 => 6,
            _ => return None,
        };
        Some(size)
    }

    fn write_payload(&self, w: &mut Writer) {
        match self {
            Message::GetService
            | Message::GetPower
            | Message::Acknowledgement
            | Message::LightGet
            | Message::LightGetPower => {}
            Message::StateService { service, port } => {
                w.u8(*service);
                w.u32(*port);
            }
            Message::StatePower { level } | Message::LightStatePower { level } => {
                w.u16(*level);
            }
            Message::LightSetColor { color, duration } => {
                w.u8(0);
                w.hsbk(color);
                w.u32(*duration);
            }
            Message::LightState {
                color,
                power,
                label,
            } => {
                w.hsbk(color);
                w.u16(0);
                w.u16(*power);
                w.label(label);
                w.u64(0);
            }
            Message::LightSetPower { level, duration } => {
                w.u16(*level);
                w.u32(*duration);
            }
        }
    }

    /// Parse a payload whose length was already checked against `payload_size`.
    fn read_payload(message_type: u16, r: &mut Reader<'_>) -> Result<Message, DecodeError> {
        let message = match message_type {
            2 => Message::GetService,
            3 => Message::StateService {
                service: r.u8(),
                port: r.u32(),
            },
            20 => Message::GetPower,
            22 => Message::StatePower { level: r.u16() },
            45 => Message::Acknowledgement,
            101 => Message::LightGet,
            102 => {
                r.skip(1);
                Message::LightSetColor {
                    color: r.hsbk(),
                    duration: r.u32(),
                }
            }
            107 => {
                let color = r.hsbk();
                r.skip(2);
                let power = r.u16();
                let label = r.label();
                r.skip(8);
                Message::LightState {
                    color,
                    power,
                    label,
                }
            }
            116 => Message::LightGetPower,
            117 => Message::LightSetPower {
                level: r.u16(),
                duration: r.u32(),
            },
            118 => Message::LightStatePower { level: r.u16() },
            other => return Err(DecodeError::UnknownType(other)),
        };
        Ok(message)
    }
}

/// A complete protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub message: Message,
}

impl Packet {
    pub fn new(header: Header, message: Message) -> Self {
        Packet { header, message }
    }
}

/// Encode a packet into the bytes sent on the wire.
///
/// Reserved fields are written as zero, so the same packet always encodes
/// to the same bytes. Labels longer than 32 bytes are truncated.
///
/// # Examples
///
/// ```
/// use lifx_lights_rs::codec::{self, Header, Message, Packet};
///
/// let packet = Packet::new(Header::broadcast(42, 7), Message::GetService);
/// let bytes = codec::encode(&packet);
/// assert_eq!(bytes.len(), codec::HEADER_SIZE);
/// assert_eq!(codec::decode(&bytes).unwrap(), packet);
/// ```
pub fn encode(packet: &Packet) -> Vec<u8> {
    let message_type = packet.message.message_type();
    let payload_size = Message::payload_size(message_type).unwrap_or(0);
    let size = HEADER_SIZE + payload_size;

    let mut w = Writer::with_capacity(size);
    let header = &packet.header;

    w.u16(size as u16);
    let mut frame = PROTOCOL & 0x0fff;
    frame |= 1 << 12; // addressable
    if header.tagged {
        frame |= 1 << 13;
    }
    w.u16(frame);
    w.u32(header.source);

    w.bytes(&header.target.map(|t| t.to_target()).unwrap_or([0; 8]));
    w.bytes(&[0; 6]);
    let mut flags = 0u8;
    if header.ack_required {
        flags |= 0b10;
    }
    if header.res_required {
        flags |= 0b01;
    }
    w.u8(flags);
    w.u8(header.sequence);

    w.u64(0);
    w.u16(message_type);
    w.u16(0);

    packet.message.write_payload(&mut w);
    w.into_inner()
}

/// Decode a datagram into a packet.
///
/// Bytes past the size declared in the header are ignored.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    let size = LittleEndian::read_u16(&bytes[0..2]) as usize;
    if size < HEADER_SIZE {
        return Err(DecodeError::Truncated {
            expected: HEADER_SIZE,
            actual: size,
        });
    }
    if size > bytes.len() {
        return Err(DecodeError::Truncated {
            expected: size,
            actual: bytes.len(),
        });
    }

    let mut r = Reader::new(&bytes[..size]);
    r.skip(2);
    let frame = r.u16();
    let protocol = frame & 0x0fff;
    if protocol != PROTOCOL {
        return Err(DecodeError::Protocol(protocol));
    }
    let tagged = frame & (1 << 13) != 0;
    let source = r.u32();

    let target = DeviceId::from_target(r.array());
    r.skip(6);
    let flags = r.u8();
    let sequence = r.u8();
    r.skip(8);
    let message_type = r.u16();
    r.skip(2);

    let payload_size =
        Message::payload_size(message_type).ok_or(DecodeError::UnknownType(message_type))?;
    if r.remaining() < payload_size {
        return Err(DecodeError::Truncated {
            expected: HEADER_SIZE + payload_size,
            actual: size,
        });
    }

    let header = Header {
        tagged,
        source,
        target,
        ack_required: flags & 0b10 != 0,
        res_required: flags & 0b01 != 0,
        sequence,
    };
    let message = Message::read_payload(message_type, &mut r)?;
    Ok(Packet { header, message })
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_capacity(capacity: usize) -> Self {
        Writer {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    fn u32(&mut self, v: u32) {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    fn u64(&mut self, v: u64) {
        let mut b = [0u8; 8];
        LittleEndian::write_u64(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    fn hsbk(&mut self, color: &Hsbk) {
        self.u16(color.hue);
        self.u16(color.saturation);
        self.u16(color.brightness);
        self.u16(color.kelvin);
    }

    fn label(&mut self, label: &str) {
        let mut field = [0u8; LABEL_SIZE];
        let mut len = label.len().min(LABEL_SIZE);
        while !label.is_char_boundary(len) {
            len -= 1;
        }
        field[..len].copy_from_slice(&label.as_bytes()[..len]);
        self.bytes(&field);
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Sequential reader over a buffer whose length has already been validated.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        slice
    }

    fn skip(&mut self, len: usize) {
        self.pos += len;
    }

    fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn u16(&mut self) -> u16 {
        LittleEndian::read_u16(self.take(2))
    }

    fn u32(&mut self) -> u32 {
        LittleEndian::read_u32(self.take(4))
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N));
        out
    }

    fn hsbk(&mut self) -> Hsbk {
        Hsbk {
            hue: self.u16(),
            saturation: self.u16(),
            brightness: self.u16(),
            kelvin: self.u16(),
        }
    }

    fn label(&mut self) -> String {
        let raw = self.take(LABEL_SIZE);
        let end = raw.iter().position(|b| *b == 0).unwrap_or(LABEL_SIZE);
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}
