
use core::fmt::Write;

use byteorder::{ByteOrder, LittleEndian};
use heapless::String;
use ieee802154::mac::{FrameType, ShortAddress};

use crate::net::NetFrame;
use crate::MAX_ROUTE_LEN;

use super::config::Config;

/// Length of the encoded frame header (excluding the routing string)
pub const HEADER_LEN: usize = 7;

/// Logical MAC frame header
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub source: ShortAddress,
    pub destination: ShortAddress,
    pub frame_type: FrameType,
}

/// MAC frame, owns the encapsulated network unit by value
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: Header,

    /// MAC overhead applied at encapsulation
    overhead: usize,

    inner: NetFrame,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Network unit plus MAC overhead exceeds the maximum frame size
    Oversize(usize),
    /// Routing destination is neither broadcast nor a node id
    InvalidDestination,
    /// Buffer too short to encode or decode
    BufferLength,
    /// Unrecognised frame type
    InvalidFrameType(u8),
    /// Routing string or payload does not fit in frame storage
    InvalidContent,
}

impl Frame {
    /// Encapsulate a network unit into a data frame from `source`
    pub fn encapsulate(source: ShortAddress, inner: NetFrame, config: &Config) -> Result<Frame, FrameError> {
        let len = inner.len() + config.frame_overhead;
        if len > config.max_frame_size {
            return Err(FrameError::Oversize(len));
        }

        let destination = resolve_destination(inner.destination(), config.broadcast_address)?;

        Ok(Frame {
            header: Header {
                source,
                destination,
                frame_type: FrameType::Data,
            },
            overhead: config.frame_overhead,
            inner,
        })
    }

    /// Recover the encapsulated network unit
    pub fn decapsulate(self) -> NetFrame {
        self.inner
    }

    pub fn inner(&self) -> &NetFrame {
        &self.inner
    }

    /// Logical frame length in bytes (network unit + MAC overhead)
    pub fn len(&self) -> usize {
        self.inner.len() + self.overhead
    }

    pub fn is_broadcast(&self) -> bool {
        self.header.destination == ShortAddress::broadcast()
    }

    /// Encode the frame for over-the-air transmission, returning the encoded length
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, FrameError> {
        let route = self.inner.destination().as_bytes();
        let payload = self.inner.payload();

        let n = HEADER_LEN + route.len() + payload.len();
        if buf.len() < n {
            return Err(FrameError::BufferLength);
        }

        buf[0] = self.header.frame_type as u8;
        buf[1] = self.overhead as u8;
        LittleEndian::write_u16(&mut buf[2..4], self.header.source.0);
        LittleEndian::write_u16(&mut buf[4..6], self.header.destination.0);
        buf[6] = route.len() as u8;

        let mut i = HEADER_LEN;
        buf[i..i+route.len()].copy_from_slice(route);
        i += route.len();
        buf[i..i+payload.len()].copy_from_slice(payload);

        Ok(n)
    }

    /// Decode a frame received over the air
    pub fn decode(buf: &[u8]) -> Result<Frame, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::BufferLength);
        }

        let frame_type = match buf[0] {
            0 => FrameType::Beacon,
            1 => FrameType::Data,
            2 => FrameType::Acknowledgement,
            3 => FrameType::MacCommand,
            v => return Err(FrameError::InvalidFrameType(v)),
        };

        let route_len = buf[6] as usize;
        if route_len > MAX_ROUTE_LEN || buf.len() < HEADER_LEN + route_len {
            return Err(FrameError::BufferLength);
        }

        let route = core::str::from_utf8(&buf[HEADER_LEN..HEADER_LEN+route_len])
            .map_err(|_| FrameError::InvalidContent)?;
        let inner = NetFrame::new(route, &buf[HEADER_LEN+route_len..])
            .map_err(|_| FrameError::InvalidContent)?;

        Ok(Frame {
            header: Header {
                source: ShortAddress(LittleEndian::read_u16(&buf[2..4])),
                destination: ShortAddress(LittleEndian::read_u16(&buf[4..6])),
                frame_type,
            },
            overhead: buf[1] as usize,
            inner,
        })
    }
}

/// Resolve a routing destination to a MAC address.
///
/// The broadcast address is matched on its literal decimal rendering,
/// anything else must parse as a node id.
pub fn resolve_destination(route: &str, broadcast_address: i32) -> Result<ShortAddress, FrameError> {
    let mut b = String::<12>::new();
    let _ = write!(b, "{}", broadcast_address);

    if route == b.as_str() {
        return Ok(ShortAddress::broadcast());
    }

    route.parse::<u16>()
        .map(ShortAddress)
        .map_err(|_| FrameError::InvalidDestination)
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> Config {
        Config {
            max_frame_size: 20,
            frame_overhead: 11,
            ..Default::default()
        }
    }

    #[test]
    fn encapsulate_data_frame() {
        let inner = NetFrame::new("7", &[0xaa; 9]).unwrap();
        let f = Frame::encapsulate(ShortAddress(3), inner.clone(), &config()).unwrap();

        assert_eq!(f.header.source, ShortAddress(3));
        assert_eq!(f.header.destination, ShortAddress(7));
        assert_eq!(f.header.frame_type, FrameType::Data);
        assert_eq!(f.len(), 20);
        assert_eq!(f.decapsulate(), inner);
    }

    #[test]
    fn encapsulate_oversize() {
        let inner = NetFrame::new("7", &[0xaa; 10]).unwrap();
        assert_eq!(Frame::encapsulate(ShortAddress(3), inner, &config()), Err(FrameError::Oversize(21)));
    }

    #[test]
    fn broadcast_resolution() {
        assert_eq!(resolve_destination("-1", -1), Ok(ShortAddress::broadcast()));
        assert_eq!(resolve_destination("0", -1), Ok(ShortAddress(0)));
        assert_eq!(resolve_destination("42", 42), Ok(ShortAddress::broadcast()));
        assert_eq!(resolve_destination(" -1", -1), Err(FrameError::InvalidDestination));
        assert_eq!(resolve_destination("sink", -1), Err(FrameError::InvalidDestination));

        let inner = NetFrame::new("-1", &[1]).unwrap();
        let f = Frame::encapsulate(ShortAddress(3), inner, &config()).unwrap();
        assert!(f.is_broadcast());
    }

    #[test]
    fn wire_encoding() {
        let inner = NetFrame::new("12", &[1, 2, 3]).unwrap();
        let f = Frame::encapsulate(ShortAddress(0x0102), inner, &config()).unwrap();

        let mut buff = [0u8; 64];
        let n = f.encode(&mut buff).unwrap();

        assert_eq!(&buff[..n], &[1, 11, 0x02, 0x01, 12, 0, 2, b'1', b'2', 1, 2, 3]);
        assert_eq!(Frame::decode(&buff[..n]), Ok(f.clone()));

        assert_eq!(f.encode(&mut buff[..8]), Err(FrameError::BufferLength));
        assert_eq!(Frame::decode(&buff[..5]), Err(FrameError::BufferLength));

        buff[0] = 9;
        assert_eq!(Frame::decode(&buff[..n]), Err(FrameError::InvalidFrameType(9)));
    }
}
