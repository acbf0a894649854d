//! In-process mock amplifier.
//!
//! Listens on an ephemeral loopback UDP port, records every request and
//! answers the way a real amplifier does: `ACKN` for zone writes, echoed codes
//! for `PING`/`WHAT`/`GOBJ`, state blocks for `SYNC`, `NACK` when told to.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use venue_devices::amp::codec::{
    PacketHeader, Response, CODE_LEN, PRESET_RECORD_LEN, PROTOCOL_ID, SUB_TYPE_SLAVE,
    SYNC_ZONE_OFFSET, SYNC_ZONE_STRIDE,
};

pub const ZONE_COUNT: usize = 4;

/// One request as the device saw it.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub sequence: u16,
    pub sub_type: u16,
    pub code: String,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub struct MockState {
    pub requests: Vec<ReceivedRequest>,
    /// (lut index, mute flags) per zone index
    pub zones: Vec<(u8, u8)>,
    pub presets: Vec<(bool, String)>,
    pub identity: Vec<u8>,
    /// Zone object id -> NACK cause
    pub nack_objects: HashMap<u16, u32>,
    pub silent: bool,
    /// Wait before each reply
    pub reply_delay: Option<Duration>,
    /// Zone gain after any preset recall
    pub preset_lut: u8,
    pub recalled_preset: Option<u8>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            zones: vec![(141, 0); ZONE_COUNT],
            presets: vec![(true, "Dinner".to_string()), (false, String::new())],
            identity: b"AMP-8150\0\0".to_vec(),
            nack_objects: HashMap::new(),
            silent: false,
            reply_delay: None,
            preset_lut: 100,
            recalled_preset: None,
        }
    }
}

pub struct MockAmplifier {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
    task: JoinHandle<()>,
}

impl MockAmplifier {
    pub async fn start() -> Self {
        Self::start_on(IpAddr::from([127, 0, 0, 1])).await
    }

    /// Start on a specific loopback address.
    pub async fn start_on(ip: IpAddr) -> Self {
        let socket = UdpSocket::bind((ip, 0)).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let state = Arc::new(Mutex::new(MockState::default()));

        let task_state = state.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let reply = handle(&task_state, &buf[..len]);
                let delay = task_state.lock().unwrap().reply_delay;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if let Some(reply) = reply {
                    let _ = socket.send_to(&reply, from).await;
                }
            }
        });

        Self { addr, state, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn request_codes(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.code).collect()
    }

    pub fn zone(&self, zone_index: usize) -> (u8, u8) {
        self.state.lock().unwrap().zones[zone_index]
    }

    pub fn set_zone(&self, zone_index: usize, lut_index: u8, mute_flags: u8) {
        self.state.lock().unwrap().zones[zone_index] = (lut_index, mute_flags);
    }

    pub fn nack_object(&self, object_id: u16, cause: u32) {
        self.state
            .lock()
            .unwrap()
            .nack_objects
            .insert(object_id, cause);
    }

    pub fn set_silent(&self, silent: bool) {
        self.state.lock().unwrap().silent = silent;
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        self.state.lock().unwrap().reply_delay = Some(delay);
    }

    /// Resize the zone table, new zones at the default gain.
    pub fn set_zone_count(&self, count: usize) {
        self.state.lock().unwrap().zones.resize(count, (141, 0));
    }

    pub fn recalled_preset(&self) -> Option<u8> {
        self.state.lock().unwrap().recalled_preset
    }
}

impl Drop for MockAmplifier {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn handle(state: &Mutex<MockState>, datagram: &[u8]) -> Option<Vec<u8>> {
    let request = Response::decode(datagram).ok()?;
    let mut state = state.lock().unwrap();
    state.requests.push(ReceivedRequest {
        sequence: request.header.sequence,
        sub_type: request.header.sub_type,
        code: request.code_str(),
        payload: request.payload.to_vec(),
    });
    if state.silent {
        return None;
    }

    let sequence = request.header.sequence;
    let payload = request.payload.as_ref();
    let reply = match &request.code {
        b"PING" => packet(b"PING", sequence, &[]),
        b"WHAT" => packet(b"WHAT", sequence, &state.identity.clone()),
        b"POBJ" => {
            let object_id = u16::from_be_bytes([payload[2], payload[3]]);
            if let Some(&cause) = state.nack_objects.get(&object_id) {
                packet(b"NACK", sequence, &cause.to_be_bytes())
            } else {
                let zone_index = (object_id / 26 - 1) as usize;
                state.zones[zone_index] = (payload[5], payload[6]);
                packet(b"ACKN", sequence, &[])
            }
        }
        b"GOBJ" => {
            let preset_index = payload[4];
            state.recalled_preset = Some(preset_index);
            let lut = state.preset_lut;
            for zone in state.zones.iter_mut() {
                *zone = (lut, 0);
            }
            packet(b"GOBJ", sequence, &[])
        }
        b"SYNC" => match payload.first() {
            Some(102) => packet(b"SYNC", sequence, &zone_block(&state.zones)),
            Some(101) => packet(b"SYNC", sequence, &preset_block(&state.presets)),
            _ => packet(b"NACK", sequence, &0x0003_0001u32.to_be_bytes()),
        },
        _ => packet(b"NACK", sequence, &0x0003_0001u32.to_be_bytes()),
    };
    Some(reply)
}

fn packet(code: &[u8; 4], sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    PacketHeader {
        protocol_id: PROTOCOL_ID,
        sub_type: SUB_TYPE_SLAVE,
        sequence,
        reserved: 0,
        chunk_length: (CODE_LEN + payload.len()) as u16,
    }
    .encode(&mut buf);
    buf.put_slice(code);
    buf.put_slice(payload);
    buf.to_vec()
}

fn zone_block(zones: &[(u8, u8)]) -> Vec<u8> {
    let mut payload = vec![0u8; SYNC_ZONE_OFFSET + SYNC_ZONE_STRIDE * zones.len()];
    for (i, (lut, flags)) in zones.iter().enumerate() {
        let offset = SYNC_ZONE_OFFSET + SYNC_ZONE_STRIDE * i;
        payload[offset] = *lut;
        payload[offset + 1] = *flags;
    }
    payload
}

fn preset_block(presets: &[(bool, String)]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(PRESET_RECORD_LEN * presets.len());
    for (valid, name) in presets {
        payload.push(u8::from(*valid));
        let mut field = [0u8; PRESET_RECORD_LEN - 1];
        field[..name.len()].copy_from_slice(name.as_bytes());
        payload.extend_from_slice(&field);
    }
    payload
}
