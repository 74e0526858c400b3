//! The keeper's binary state file.
//!
//! The keeper persists its FSM position after every cycle so a restart
//! resumes exactly where it left off, without asking the monitor to
//! replay history.
//!
//! # Layout
//!
//! ```text
//! Offset  Size  Content
//! ─────────────────────
//! 0x00    8     magic "STWDKEEP"
//! 0x08    4     format version (little endian)
//! 0x0C    ...   fields, fixed order, little endian
//! 0xFC    4     CRC32 of bytes 0x00..0xFC
//! ```
//!
//! One 256-byte copy, written to a temporary file and renamed into
//! place, so readers see either the old state or the new state in
//! full. The CRC catches torn or corrupted files.

use std::fs;
use std::io::Write;
use std::path::Path;

use steward_types::{
    CandidatePriority, GroupId, Lsn, NodeId, NodeState, SystemIdentifier, Timestamp,
};

use crate::error::{KeeperError, KeeperResult};

/// Magic bytes identifying a keeper state file.
const STATE_FILE_MAGIC: [u8; 8] = *b"STWDKEEP";

/// Current state file format version.
const STATE_FILE_VERSION: u32 = 1;

/// Size of the state file in bytes.
pub const STATE_FILE_SIZE: usize = 256;

/// Offset of the CRC32 trailer.
const CRC_OFFSET: usize = STATE_FILE_SIZE - 4;

/// The keeper state that survives restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeeperStateFile {
    pub node_id: NodeId,
    pub group_id: GroupId,
    /// The state the keeper last reached.
    pub current_state: NodeState,
    /// The goal the monitor last assigned.
    pub assigned_state: NodeState,
    pub current_lsn: Lsn,
    /// When the monitor last answered a `node_active`.
    pub last_monitor_contact: Timestamp,
    /// Zero while the local cluster is not initialized yet.
    pub system_identifier: Option<SystemIdentifier>,
    pub candidate_priority: CandidatePriority,
    pub replication_quorum: bool,
}

impl KeeperStateFile {
    /// The state of a freshly registered keeper.
    pub fn initial(node_id: NodeId, group_id: GroupId, assigned_state: NodeState) -> Self {
        Self {
            node_id,
            group_id,
            current_state: NodeState::Init,
            assigned_state,
            current_lsn: Lsn::INVALID,
            last_monitor_contact: Timestamp::EPOCH,
            system_identifier: None,
            candidate_priority: CandidatePriority::default(),
            replication_quorum: true,
        }
    }

    /// Serializes to the fixed layout.
    pub fn to_bytes(&self) -> [u8; STATE_FILE_SIZE] {
        let mut buf = [0u8; STATE_FILE_SIZE];
        buf[0..8].copy_from_slice(&STATE_FILE_MAGIC);
        buf[8..12].copy_from_slice(&STATE_FILE_VERSION.to_le_bytes());

        let mut offset = 12;
        let mut put_u64 = |buf: &mut [u8; STATE_FILE_SIZE], value: u64| {
            buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
            offset += 8;
        };
        put_u64(&mut buf, self.node_id.as_u64());
        put_u64(&mut buf, self.group_id.as_u64());
        put_u64(&mut buf, self.current_lsn.as_u64());
        put_u64(&mut buf, self.last_monitor_contact.as_nanos());
        put_u64(
            &mut buf,
            self.system_identifier.map(|s| s.as_u64()).unwrap_or(0),
        );

        buf[offset] = state_code(self.current_state);
        buf[offset + 1] = state_code(self.assigned_state);
        buf[offset + 2] = self.candidate_priority.as_u8();
        buf[offset + 3] = u8::from(self.replication_quorum);

        let crc = crc32fast::hash(&buf[..CRC_OFFSET]);
        buf[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserializes the fixed layout, verifying magic, version and CRC.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, String> {
        if buf.len() != STATE_FILE_SIZE {
            return Err(format!("expected {STATE_FILE_SIZE} bytes, got {}", buf.len()));
        }
        if buf[0..8] != STATE_FILE_MAGIC {
            return Err("bad magic".into());
        }
        let version = u32::from_le_bytes(buf[8..12].try_into().expect("sized"));
        if version != STATE_FILE_VERSION {
            return Err(format!("unsupported version {version}"));
        }
        let stored_crc = u32::from_le_bytes(buf[CRC_OFFSET..].try_into().expect("sized"));
        let actual_crc = crc32fast::hash(&buf[..CRC_OFFSET]);
        if stored_crc != actual_crc {
            return Err("checksum mismatch".into());
        }

        let mut offset = 12;
        let mut get_u64 = |buf: &[u8]| {
            let value = u64::from_le_bytes(buf[offset..offset + 8].try_into().expect("sized"));
            offset += 8;
            value
        };
        let node_id = NodeId::new(get_u64(buf));
        let group_id = GroupId::new(get_u64(buf));
        let current_lsn = Lsn::new(get_u64(buf));
        let last_monitor_contact = Timestamp::from_nanos(get_u64(buf));
        let sysid = get_u64(buf);

        let current_state = state_from_code(buf[offset])?;
        let assigned_state = state_from_code(buf[offset + 1])?;
        let candidate_priority = CandidatePriority::new(buf[offset + 2]);
        let replication_quorum = buf[offset + 3] != 0;

        Ok(Self {
            node_id,
            group_id,
            current_state,
            assigned_state,
            current_lsn,
            last_monitor_contact,
            system_identifier: (sysid != 0).then(|| SystemIdentifier::new(sysid)),
            candidate_priority,
            replication_quorum,
        })
    }

    /// Loads the state file, or `Ok(None)` when it does not exist yet.
    pub fn load(path: &Path) -> KeeperResult<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KeeperError::StateFile {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        Self::from_bytes(&bytes)
            .map(Some)
            .map_err(|message| KeeperError::StateFileCorrupt {
                path: path.display().to_string(),
                message,
            })
    }

    /// Writes the state file atomically (temp file, then rename).
    pub fn store(&self, path: &Path) -> KeeperResult<()> {
        let tmp = path.with_extension("state.new");
        let io_err = |e| KeeperError::StateFile {
            path: path.display().to_string(),
            source: e,
        };

        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&self.to_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    /// Removes the state file, called when the node is dropped.
    pub fn remove(path: &Path) -> KeeperResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeeperError::StateFile {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}

fn state_code(state: NodeState) -> u8 {
    NodeState::ALL
        .iter()
        .position(|s| *s == state)
        .expect("every state is in ALL") as u8
}

fn state_from_code(code: u8) -> Result<NodeState, String> {
    NodeState::ALL
        .get(code as usize)
        .copied()
        .ok_or_else(|| format!("unknown state code {code}"))
}
