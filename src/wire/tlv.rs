//! TLV parsing and construction for the classic (narrow-metric) EIGRP
//! packet body.
//!
//! Each TLV is `type: u16, length: u16 (includes these 4 bytes), payload`.
//! Unknown TLV types are preserved as `Tlv::Unknown` rather than rejected —
//! EIGRP routers are expected to forward/ignore TLVs they don't recognize
//! (Peer-MTR-List and Peer-TID-List are modeled this way deliberately,
//! since multi-topology/VRF routing isn't implemented here).

use std::net::Ipv4Addr;

use crate::address::Prefix;
use crate::error::{Error, Result};
use crate::metric::{KValues, VectorMetric};
use crate::wire::cursor::{Reader, Writer};

pub const TYPE_PARAMETER: u16 = 0x0001;
pub const TYPE_AUTHENTICATION: u16 = 0x0002;
pub const TYPE_SEQUENCE: u16 = 0x0003;
pub const TYPE_SOFTWARE_VERSION: u16 = 0x0004;
pub const TYPE_MULTICAST_SEQUENCE: u16 = 0x0005;
pub const TYPE_PEER_TERMINATION: u16 = 0x0009;
pub const TYPE_PEER_MTRLIST: u16 = 0x000A;
pub const TYPE_PEER_TIDLIST: u16 = 0x000B;
pub const TYPE_IPV4_INTERNAL: u16 = 0x0102;
pub const TYPE_IPV4_EXTERNAL: u16 = 0x0103;

const TLV_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Md5,
    Sha256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTlv {
    pub kind: AuthKind,
    pub key_id: u32,
    pub key_sequence: u32,
    pub digest: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub k: KValues,
    pub hold_time: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareVersion {
    pub ios_major: u8,
    pub ios_minor: u8,
    pub tlv_major: u8,
    pub tlv_minor: u8,
}

impl Default for SoftwareVersion {
    /// Classic TLV version 1.2, the value this crate negotiates and emits.
    fn default() -> Self {
        SoftwareVersion { ios_major: 12, ios_minor: 4, tlv_major: 1, tlv_minor: 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalEntry {
    pub next_hop: Ipv4Addr,
    pub metric: VectorMetric,
    pub prefix: Prefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalProtocol {
    Igrp,
    Eigrp,
    Static,
    Rip,
    Ospf,
    Bgp,
    Connected,
    Unknown(u8),
}

impl ExternalProtocol {
    fn from_wire(v: u8) -> Self {
        match v {
            1 => ExternalProtocol::Igrp,
            3 => ExternalProtocol::Eigrp,
            4 => ExternalProtocol::Static,
            5 => ExternalProtocol::Rip,
            7 => ExternalProtocol::Ospf,
            8 => ExternalProtocol::Bgp,
            9 => ExternalProtocol::Connected,
            n => ExternalProtocol::Unknown(n),
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            ExternalProtocol::Igrp => 1,
            ExternalProtocol::Eigrp => 3,
            ExternalProtocol::Static => 4,
            ExternalProtocol::Rip => 5,
            ExternalProtocol::Ospf => 7,
            ExternalProtocol::Bgp => 8,
            ExternalProtocol::Connected => 9,
            ExternalProtocol::Unknown(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalEntry {
    pub next_hop: Ipv4Addr,
    pub originating_router: Ipv4Addr,
    pub originating_as: u32,
    pub arbitrary_tag: u32,
    pub external_metric: u32,
    pub protocol: ExternalProtocol,
    pub external_flags: u8,
    pub metric: VectorMetric,
    pub prefix: Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tlv {
    Parameter(Parameter),
    Authentication(AuthTlv),
    Sequence(Vec<Ipv4Addr>),
    SoftwareVersion(SoftwareVersion),
    NextMulticastSequence(u32),
    PeerTermination(Ipv4Addr),
    PeerMtrList(Vec<u8>),
    PeerTidList(Vec<u8>),
    Ipv4Internal(InternalEntry),
    Ipv4External(ExternalEntry),
    Unknown { typ: u16, payload: Vec<u8> },
}

impl Tlv {
    pub fn decode(r: &mut Reader) -> Result<Self> {
        let typ = r.u16()?;
        let len = r.u16()? as usize;
        if len < TLV_HEADER_LEN {
            return Err(Error::ErrCorrupt("TLV length shorter than its own header"));
        }
        let payload_len = len - TLV_HEADER_LEN;
        if r.remaining() < payload_len {
            return Err(Error::ErrShort { need: payload_len, have: r.remaining() });
        }
        let payload = r.take(payload_len)?;
        let mut pr = Reader::new(payload);

        Ok(match typ {
            TYPE_PARAMETER => Tlv::Parameter(decode_parameter(&mut pr)?),
            TYPE_AUTHENTICATION => Tlv::Authentication(decode_auth(&mut pr)?),
            TYPE_SEQUENCE => Tlv::Sequence(decode_sequence(&mut pr)?),
            TYPE_SOFTWARE_VERSION => Tlv::SoftwareVersion(decode_software_version(&mut pr)?),
            TYPE_MULTICAST_SEQUENCE => Tlv::NextMulticastSequence(pr.u32()?),
            TYPE_PEER_TERMINATION => Tlv::PeerTermination(Ipv4Addr::from(pr.u32()?)),
            TYPE_PEER_MTRLIST => Tlv::PeerMtrList(pr.rest().to_vec()),
            TYPE_PEER_TIDLIST => Tlv::PeerTidList(pr.rest().to_vec()),
            TYPE_IPV4_INTERNAL => Tlv::Ipv4Internal(decode_internal(&mut pr)?),
            TYPE_IPV4_EXTERNAL => Tlv::Ipv4External(decode_external(&mut pr)?),
            other => Tlv::Unknown { typ: other, payload: payload.to_vec() },
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        let typ = self.wire_type();
        w.u16(typ);
        let len_at = w.len();
        w.u16(0);
        match self {
            Tlv::Parameter(p) => encode_parameter(w, p),
            Tlv::Authentication(a) => encode_auth(w, a),
            Tlv::Sequence(addrs) => encode_sequence(w, addrs),
            Tlv::SoftwareVersion(v) => encode_software_version(w, v),
            Tlv::NextMulticastSequence(seq) => w.u32(*seq),
            Tlv::PeerTermination(addr) => w.u32((*addr).into()),
            Tlv::PeerMtrList(raw) | Tlv::PeerTidList(raw) => w.bytes(raw),
            Tlv::Ipv4Internal(e) => encode_internal(w, e),
            Tlv::Ipv4External(e) => encode_external(w, e),
            Tlv::Unknown { payload, .. } => w.bytes(payload),
        }
        let total_len = (w.len() - len_at + 2) as u16;
        w.patch_u16(len_at, total_len);
    }

    fn wire_type(&self) -> u16 {
        match self {
            Tlv::Parameter(_) => TYPE_PARAMETER,
            Tlv::Authentication(_) => TYPE_AUTHENTICATION,
            Tlv::Sequence(_) => TYPE_SEQUENCE,
            Tlv::SoftwareVersion(_) => TYPE_SOFTWARE_VERSION,
            Tlv::NextMulticastSequence(_) => TYPE_MULTICAST_SEQUENCE,
            Tlv::PeerTermination(_) => TYPE_PEER_TERMINATION,
            Tlv::PeerMtrList(_) => TYPE_PEER_MTRLIST,
            Tlv::PeerTidList(_) => TYPE_PEER_TIDLIST,
            Tlv::Ipv4Internal(_) => TYPE_IPV4_INTERNAL,
            Tlv::Ipv4External(_) => TYPE_IPV4_EXTERNAL,
            Tlv::Unknown { typ, .. } => *typ,
        }
    }
}

fn decode_parameter(r: &mut Reader) -> Result<Parameter> {
    let k1 = r.u8()?;
    let k2 = r.u8()?;
    let k3 = r.u8()?;
    let k4 = r.u8()?;
    let k5 = r.u8()?;
    let _reserved = r.u8()?;
    let hold_time = r.u16()?;
    Ok(Parameter { k: KValues { k1, k2, k3, k4, k5 }, hold_time })
}

fn encode_parameter(w: &mut Writer, p: &Parameter) {
    w.u8(p.k.k1);
    w.u8(p.k.k2);
    w.u8(p.k.k3);
    w.u8(p.k.k4);
    w.u8(p.k.k5);
    w.u8(0);
    w.u16(p.hold_time);
}

fn decode_auth(r: &mut Reader) -> Result<AuthTlv> {
    let auth_type = r.u16()?;
    let _len = r.u16()?;
    let key_id = r.u32()?;
    let key_sequence = r.u32()?;
    let _reserved = r.take(8)?;
    let kind = match auth_type {
        2 => AuthKind::Md5,
        3 => AuthKind::Sha256,
        _ => return Err(Error::ErrCorrupt("unknown authentication type")),
    };
    let digest = r.rest().to_vec();
    Ok(AuthTlv { kind, key_id, key_sequence, digest })
}

fn encode_auth(w: &mut Writer, a: &AuthTlv) {
    w.u16(match a.kind {
        AuthKind::Md5 => 2,
        AuthKind::Sha256 => 3,
    });
    w.u16(a.digest.len() as u16 + 20);
    w.u32(a.key_id);
    w.u32(a.key_sequence);
    w.bytes(&[0u8; 8]);
    w.bytes(&a.digest);
}

fn decode_sequence(r: &mut Reader) -> Result<Vec<Ipv4Addr>> {
    let addr_len = r.u8()?;
    if addr_len != 4 {
        return Err(Error::ErrCorrupt("non-IPv4 address in Sequence TLV"));
    }
    let mut addrs = Vec::new();
    while !r.is_empty() {
        addrs.push(Ipv4Addr::from(r.u32()?));
    }
    Ok(addrs)
}

fn encode_sequence(w: &mut Writer, addrs: &[Ipv4Addr]) {
    w.u8(4);
    for a in addrs {
        w.u32((*a).into());
    }
}

fn decode_software_version(r: &mut Reader) -> Result<SoftwareVersion> {
    Ok(SoftwareVersion {
        ios_major: r.u8()?,
        ios_minor: r.u8()?,
        tlv_major: r.u8()?,
        tlv_minor: r.u8()?,
    })
}

fn encode_software_version(w: &mut Writer, v: &SoftwareVersion) {
    w.u8(v.ios_major);
    w.u8(v.ios_minor);
    w.u8(v.tlv_major);
    w.u8(v.tlv_minor);
}

fn decode_metric_and_prefix(r: &mut Reader) -> Result<(VectorMetric, Prefix)> {
    let delay = r.u32()?;
    let bandwidth = r.u32()?;
    let mtu_hop = r.u32()?;
    let mtu = mtu_hop >> 8;
    let hop_count = (mtu_hop & 0xff) as u8;
    let reliability = r.u8()?;
    let load = r.u8()?;
    let _reserved = r.u16()?;
    let prefix_len = r.u8()?;
    let byte_len = ((prefix_len as usize) + 7) / 8;
    let dest_bytes = r.take(byte_len)?;
    let prefix = Prefix::unpack(prefix_len, dest_bytes);
    let metric = VectorMetric { bandwidth, delay, reliability, load, mtu, hop_count };
    Ok((metric, prefix))
}

fn encode_metric_and_prefix(w: &mut Writer, metric: &VectorMetric, prefix: &Prefix) {
    w.u32(metric.delay);
    w.u32(metric.bandwidth);
    w.u32((metric.mtu << 8) | u32::from(metric.hop_count));
    w.u8(metric.reliability);
    w.u8(metric.load);
    w.u16(0);
    w.u8(prefix.len());
    w.bytes(&prefix.pack());
}

fn decode_internal(r: &mut Reader) -> Result<InternalEntry> {
    let next_hop = Ipv4Addr::from(r.u32()?);
    let (metric, prefix) = decode_metric_and_prefix(r)?;
    Ok(InternalEntry { next_hop, metric, prefix })
}

fn encode_internal(w: &mut Writer, e: &InternalEntry) {
    w.u32(e.next_hop.into());
    encode_metric_and_prefix(w, &e.metric, &e.prefix);
}

fn decode_external(r: &mut Reader) -> Result<ExternalEntry> {
    let next_hop = Ipv4Addr::from(r.u32()?);
    let originating_router = Ipv4Addr::from(r.u32()?);
    let originating_as = r.u32()?;
    let arbitrary_tag = r.u32()?;
    let external_metric = r.u32()?;
    let reserved_flags = r.u8()?;
    let protocol = ExternalProtocol::from_wire(r.u8()?);
    let external_flags = reserved_flags;
    let (metric, prefix) = decode_metric_and_prefix(r)?;
    Ok(ExternalEntry {
        next_hop,
        originating_router,
        originating_as,
        arbitrary_tag,
        external_metric,
        protocol,
        external_flags,
        metric,
        prefix,
    })
}

fn encode_external(w: &mut Writer, e: &ExternalEntry) {
    w.u32(e.next_hop.into());
    w.u32(e.originating_router.into());
    w.u32(e.originating_as);
    w.u32(e.arbitrary_tag);
    w.u32(e.external_metric);
    w.u8(e.external_flags);
    w.u8(e.protocol.to_wire());
    encode_metric_and_prefix(w, &e.metric, &e.prefix);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_round_trip() {
        let p = Tlv::Parameter(Parameter { k: KValues { k1: 1, k2: 0, k3: 1, k4: 0, k5: 0 }, hold_time: 15 });
        let mut w = Writer::new();
        p.encode(&mut w);
        let bytes = w.into_vec();
        assert_eq!(bytes[0..2], [0x00, 0x01]);
        let mut r = Reader::new(&bytes);
        assert_eq!(Tlv::decode(&mut r).unwrap(), p);
    }

    #[test]
    fn internal_entry_round_trip() {
        let entry = InternalEntry {
            next_hop: Ipv4Addr::new(0, 0, 0, 0),
            metric: VectorMetric::from_link(10_000, 2000, 1500),
            prefix: Prefix::new(Ipv4Addr::new(10, 1, 2, 0), 24),
        };
        let tlv = Tlv::Ipv4Internal(entry);
        let mut w = Writer::new();
        tlv.encode(&mut w);
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(Tlv::decode(&mut r).unwrap(), tlv);
    }

    #[test]
    fn unknown_tlv_is_preserved_opaquely() {
        let mut w = Writer::new();
        w.u16(0xBEEF);
        w.u16(6);
        w.bytes(&[0x01, 0x02]);
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        match Tlv::decode(&mut r).unwrap() {
            Tlv::Unknown { typ, payload } => {
                assert_eq!(typ, 0xBEEF);
                assert_eq!(payload, vec![0x01, 0x02]);
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn sequence_tlv_round_trip() {
        let addrs = vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)];
        let tlv = Tlv::Sequence(addrs.clone());
        let mut w = Writer::new();
        tlv.encode(&mut w);
        let mut r = Reader::new(&w.into_vec());
        assert_eq!(Tlv::decode(&mut r).unwrap(), Tlv::Sequence(addrs));
    }
}
