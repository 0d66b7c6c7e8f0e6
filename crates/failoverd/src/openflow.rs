//! OpenFlow 1.0 flow-mod messages and switch control channels.
//!
//! The switch transport (handshake, keepalive, stream framing) lives outside
//! this crate. The controller only builds `OFPT_FLOW_MOD` messages and hands
//! them to a [`ControlChannel`], fire-and-forget.

use crate::error::{FailoverError, Result};
use crate::types::{Dpid, PortNo};
use byteorder::{BigEndian, WriteBytesExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// OpenFlow protocol version 1.0
pub const OFP_VERSION: u8 = 0x01;
/// `OFPT_FLOW_MOD` message type
pub const OFPT_FLOW_MOD: u8 = 14;
/// IPv4 ethertype
pub const ETH_TYPE_IPV4: u16 = 0x0800;
/// Default flow priority (`OFP_DEFAULT_PRIORITY`)
pub const OFP_DEFAULT_PRIORITY: u16 = 0x8000;

const OFP_NO_BUFFER: u32 = 0xffff_ffff;
const OFPP_NONE: u16 = 0xffff;
const OFPAT_OUTPUT: u16 = 0;

const OFPFW_IN_PORT: u32 = 1 << 0;
const OFPFW_DL_VLAN: u32 = 1 << 1;
const OFPFW_DL_SRC: u32 = 1 << 2;
const OFPFW_DL_DST: u32 = 1 << 3;
const OFPFW_NW_PROTO: u32 = 1 << 5;
const OFPFW_TP_SRC: u32 = 1 << 6;
const OFPFW_TP_DST: u32 = 1 << 7;
const OFPFW_DL_VLAN_PCP: u32 = 1 << 20;
const OFPFW_NW_TOS: u32 = 1 << 21;

/// Everything wildcarded except ethertype and exact nw_src / nw_dst.
const IPV4_PAIR_WILDCARDS: u32 = OFPFW_IN_PORT
    | OFPFW_DL_VLAN
    | OFPFW_DL_SRC
    | OFPFW_DL_DST
    | OFPFW_NW_PROTO
    | OFPFW_TP_SRC
    | OFPFW_TP_DST
    | OFPFW_DL_VLAN_PCP
    | OFPFW_NW_TOS;

/// Encoded length of a flow-mod with a single output action.
pub const FLOW_MOD_LEN: usize = 8 + 40 + 24 + 8;

/// Flow-mod command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u16)]
pub enum FlowModCommand {
    Add = 0,
    Modify = 1,
    ModifyStrict = 2,
    Delete = 3,
    DeleteStrict = 4,
}

/// Match on `(nw_src, nw_dst, dl_type = IPv4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FlowMatch {
    pub nw_src: Ipv4Addr,
    pub nw_dst: Ipv4Addr,
}

impl FlowMatch {
    pub fn ipv4(nw_src: Ipv4Addr, nw_dst: Ipv4Addr) -> Self {
        Self { nw_src, nw_dst }
    }

    pub fn dl_type(&self) -> u16 {
        ETH_TYPE_IPV4
    }
}

/// A flow rule install message: match, `output(port)` action, timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FlowMod {
    pub command: FlowModCommand,
    pub flow_match: FlowMatch,
    pub out_port: PortNo,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
}

impl FlowMod {
    /// `ADD` of an IPv4 `src -> dst` rule forwarding out of `out_port`.
    pub fn add(src: Ipv4Addr, dst: Ipv4Addr, out_port: PortNo) -> Self {
        Self {
            command: FlowModCommand::Add,
            flow_match: FlowMatch::ipv4(src, dst),
            out_port,
            idle_timeout: 0,
            hard_timeout: 0,
            priority: OFP_DEFAULT_PRIORITY,
        }
    }

    pub fn with_idle_timeout(mut self, secs: u16) -> Self {
        self.idle_timeout = secs;
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    /// Encodes the message as an OpenFlow 1.0 `OFPT_FLOW_MOD`.
    pub fn encode(&self, xid: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FLOW_MOD_LEN);
        self.write_to(&mut buf, xid)
            .expect("writing to a Vec cannot fail");
        buf
    }

    fn write_to<W: Write>(&self, w: &mut W, xid: u32) -> std::io::Result<()> {
        // ofp_header
        w.write_u8(OFP_VERSION)?;
        w.write_u8(OFPT_FLOW_MOD)?;
        w.write_u16::<BigEndian>(FLOW_MOD_LEN as u16)?;
        w.write_u32::<BigEndian>(xid)?;

        // ofp_match
        w.write_u32::<BigEndian>(IPV4_PAIR_WILDCARDS)?;
        w.write_u16::<BigEndian>(0)?; // in_port
        w.write_all(&[0; 6])?; // dl_src
        w.write_all(&[0; 6])?; // dl_dst
        w.write_u16::<BigEndian>(0)?; // dl_vlan
        w.write_u8(0)?; // dl_vlan_pcp
        w.write_u8(0)?; // pad1
        w.write_u16::<BigEndian>(self.flow_match.dl_type())?;
        w.write_u8(0)?; // nw_tos
        w.write_u8(0)?; // nw_proto
        w.write_all(&[0; 2])?; // pad2
        w.write_all(&self.flow_match.nw_src.octets())?;
        w.write_all(&self.flow_match.nw_dst.octets())?;
        w.write_u16::<BigEndian>(0)?; // tp_src
        w.write_u16::<BigEndian>(0)?; // tp_dst

        // ofp_flow_mod body
        w.write_u64::<BigEndian>(0)?; // cookie
        w.write_u16::<BigEndian>(self.command as u16)?;
        w.write_u16::<BigEndian>(self.idle_timeout)?;
        w.write_u16::<BigEndian>(self.hard_timeout)?;
        w.write_u16::<BigEndian>(self.priority)?;
        w.write_u32::<BigEndian>(OFP_NO_BUFFER)?;
        w.write_u16::<BigEndian>(OFPP_NONE)?;
        w.write_u16::<BigEndian>(0)?; // flags

        // ofp_action_output
        w.write_u16::<BigEndian>(OFPAT_OUTPUT)?;
        w.write_u16::<BigEndian>(8)?;
        w.write_u16::<BigEndian>(self.out_port)?;
        w.write_u16::<BigEndian>(0)?; // max_len
        Ok(())
    }
}

impl fmt::Display for FlowMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ip,nw_src={},nw_dst={} actions=output:{} idle_timeout={}",
            self.flow_match.nw_src, self.flow_match.nw_dst, self.out_port, self.idle_timeout
        )
    }
}

/// Per-switch control channel used to push flow rules.
///
/// Sends are fire-and-forget: no acknowledgement is awaited and a failed send
/// is never retried.
pub trait ControlChannel: Send + Sync {
    fn send_flow_mod(&self, flow_mod: &FlowMod) -> Result<()>;
}

/// Writes encoded flow-mods to a byte sink owned by the switch transport.
pub struct WriterChannel<W: Write + Send> {
    dpid: Dpid,
    writer: Mutex<W>,
    next_xid: AtomicU32,
}

impl<W: Write + Send> WriterChannel<W> {
    pub fn new(dpid: Dpid, writer: W) -> Self {
        Self {
            dpid,
            writer: Mutex::new(writer),
            next_xid: AtomicU32::new(1),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> ControlChannel for WriterChannel<W> {
    fn send_flow_mod(&self, flow_mod: &FlowMod) -> Result<()> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let bytes = flow_mod.encode(xid);
        let mut writer = self.writer.lock();
        writer
            .write_all(&bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| FailoverError::ChannelSend(format!("switch {}: {}", self.dpid, e)))
    }
}

/// Logs each flow-mod instead of sending it. Used for scripted switches.
#[derive(Debug, Clone, Copy)]
pub struct LogChannel {
    dpid: Dpid,
}

impl LogChannel {
    pub fn new(dpid: Dpid) -> Self {
        Self { dpid }
    }
}

impl ControlChannel for LogChannel {
    fn send_flow_mod(&self, flow_mod: &FlowMod) -> Result<()> {
        info!(dpid = self.dpid, "flow_mod {}", flow_mod);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryChannelState {
    sent: Vec<FlowMod>,
    table: BTreeMap<FlowMatch, FlowMod>,
}

/// In-memory channel that records every flow-mod and models the switch's
/// flow table: an `ADD` whose match is already installed replaces it.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    state: Mutex<MemoryChannelState>,
    fail_sends: AtomicBool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send fail, as if the transport dropped.
    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::Relaxed);
    }

    /// Every flow-mod accepted so far, in send order.
    pub fn sent(&self) -> Vec<FlowMod> {
        self.state.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    /// Effective flow table, ordered by match.
    pub fn flow_table(&self) -> Vec<FlowMod> {
        self.state.lock().table.values().copied().collect()
    }

    /// Output port currently installed for `src -> dst`.
    pub fn output_for(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Option<PortNo> {
        self.state
            .lock()
            .table
            .get(&FlowMatch::ipv4(src, dst))
            .map(|fm| fm.out_port)
    }
}

impl ControlChannel for MemoryChannel {
    fn send_flow_mod(&self, flow_mod: &FlowMod) -> Result<()> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(FailoverError::ChannelSend(
                "memory channel closed".to_string(),
            ));
        }
        let mut state = self.state.lock();
        state.sent.push(*flow_mod);
        match flow_mod.command {
            FlowModCommand::Add | FlowModCommand::Modify | FlowModCommand::ModifyStrict => {
                state.table.insert(flow_mod.flow_match, *flow_mod);
            }
            FlowModCommand::Delete | FlowModCommand::DeleteStrict => {
                state.table.remove(&flow_mod.flow_match);
            }
        }
        Ok(())
    }
}

/// Registered control channels by datapath id.
///
/// Channels are added on switch-connect and never explicitly removed; a dead
/// transport simply starts failing sends.
#[derive(Default, Clone)]
pub struct ConnectionTable {
    channels: HashMap<Dpid, Arc<dyn ControlChannel>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `channel` for `dpid`. Returns true if it replaced an older one.
    pub fn register(&mut self, dpid: Dpid, channel: Arc<dyn ControlChannel>) -> bool {
        let replaced = self.channels.insert(dpid, channel).is_some();
        if replaced {
            debug!(dpid, "Replaced control channel on reconnect");
        }
        replaced
    }

    pub fn get(&self, dpid: Dpid) -> Option<&Arc<dyn ControlChannel>> {
        self.channels.get(&dpid)
    }

    pub fn contains(&self, dpid: Dpid) -> bool {
        self.channels.contains_key(&dpid)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Connected switches in ascending order.
    pub fn dpids(&self) -> Vec<Dpid> {
        let mut dpids: Vec<Dpid> = self.channels.keys().copied().collect();
        dpids.sort_unstable();
        dpids
    }
}

impl fmt::Debug for ConnectionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTable")
            .field("dpids", &self.dpids())
            .finish()
    }
}
