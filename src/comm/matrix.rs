//! Point-to-point communication matrices.
//!
//! Messages are read from Instant events: a destination attribute marks a
//! send, a source attribute a receive. Each stream yields a [`CommPartial`]
//! of per-(sender, receiver) tallies; partials merge additively.

use crate::trace::{Event, EventKind, EventStream};
use crate::utils::config::{DESTINATION_FIELD_NAMES, MESSAGE_SIZE_FIELD_NAMES, SOURCE_FIELD_NAMES};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Index;

/// Value reported per matrix cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommOutput {
    /// Total bytes
    #[default]
    Size,
    /// Number of messages
    Count,
}

impl std::str::FromStr for CommOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "size" | "bytes" => Ok(Self::Size),
            "count" | "messages" => Ok(Self::Count),
            other => Err(format!("unknown comm output '{}'", other)),
        }
    }
}

impl fmt::Display for CommOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size => f.write_str("size"),
            Self::Count => f.write_str("count"),
        }
    }
}

/// Which side recorded a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// One message as seen by the recording process
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub direction: Direction,
    pub sender: u32,
    pub receiver: u32,
    pub bytes: Option<u64>,
    pub timestamp: i64,
}

impl Message {
    /// Decode a message record; `None` when the event carries no usable peer
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != EventKind::Instant {
            return None;
        }
        let bytes = event
            .attr_any(MESSAGE_SIZE_FIELD_NAMES)
            .and_then(|v| v.as_u64());
        let peer = |names: &[&str]| {
            event
                .attr_any(names)
                .and_then(|v| v.as_u64())
                .and_then(|p| u32::try_from(p).ok())
        };

        if let Some(receiver) = peer(DESTINATION_FIELD_NAMES) {
            return Some(Self {
                direction: Direction::Send,
                sender: event.process_id,
                receiver,
                bytes,
                timestamp: event.timestamp,
            });
        }
        peer(SOURCE_FIELD_NAMES).map(|sender| Self {
            direction: Direction::Receive,
            sender,
            receiver: event.process_id,
            bytes,
            timestamp: event.timestamp,
        })
    }
}

/// Message records of one stream, in time order
pub fn messages(stream: &EventStream) -> impl Iterator<Item = Message> + '_ {
    stream.events().iter().filter_map(Message::from_event)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    messages: u64,
    bytes: u64,
}

impl Tally {
    fn add(&mut self, other: Tally) {
        self.messages += other.messages;
        self.bytes += other.bytes;
    }

    fn value(&self, output: CommOutput) -> u64 {
        match output {
            CommOutput::Size => self.bytes,
            CommOutput::Count => self.messages,
        }
    }
}

/// Per-stream message tallies awaiting reduction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommPartial {
    sends: BTreeMap<(u32, u32), Tally>,
    sized_sends: BTreeMap<(u32, u32), Tally>,
    receives: BTreeMap<(u32, u32), Tally>,
    sized_receives: BTreeMap<(u32, u32), Tally>,
    processes: BTreeSet<u32>,
}

impl CommPartial {
    pub fn from_stream(stream: &EventStream) -> Self {
        let mut partial = Self {
            processes: stream.process_ids(),
            ..Self::default()
        };

        for message in messages(stream) {
            partial.processes.insert(message.sender);
            partial.processes.insert(message.receiver);

            let key = (message.sender, message.receiver);
            let (all, sized) = match message.direction {
                Direction::Send => (&mut partial.sends, &mut partial.sized_sends),
                Direction::Receive => (&mut partial.receives, &mut partial.sized_receives),
            };
            all.entry(key).or_default().messages += 1;
            if let Some(bytes) = message.bytes {
                let tally = sized.entry(key).or_default();
                tally.messages += 1;
                tally.bytes += bytes;
            }
        }
        partial
    }

    /// Add another partial into this one
    pub fn merge(&mut self, other: CommPartial) {
        fn add_all(into: &mut BTreeMap<(u32, u32), Tally>, from: BTreeMap<(u32, u32), Tally>) {
            for (key, tally) in from {
                into.entry(key).or_default().add(tally);
            }
        }
        add_all(&mut self.sends, other.sends);
        add_all(&mut self.sized_sends, other.sized_sends);
        add_all(&mut self.receives, other.receives);
        add_all(&mut self.sized_receives, other.sized_receives);
        self.processes.extend(other.processes);
    }

    /// Whether any send record was seen
    pub fn has_sends(&self) -> bool {
        !self.sends.is_empty()
    }

    /// Direction whose records are counted: sends, or receives when there are none
    pub fn authoritative(&self) -> Direction {
        if self.has_sends() {
            Direction::Send
        } else {
            Direction::Receive
        }
    }

    fn tallies(&self, output: CommOutput) -> &BTreeMap<(u32, u32), Tally> {
        match (self.authoritative(), output) {
            (Direction::Send, CommOutput::Count) => &self.sends,
            (Direction::Send, CommOutput::Size) => &self.sized_sends,
            (Direction::Receive, CommOutput::Count) => &self.receives,
            (Direction::Receive, CommOutput::Size) => &self.sized_receives,
        }
    }

    /// Build the square matrix over every observed process
    pub fn to_matrix(&self, output: CommOutput) -> CommMatrix {
        let processes: Vec<u32> = self.processes.iter().copied().collect();
        let position: BTreeMap<u32, usize> =
            processes.iter().enumerate().map(|(i, p)| (*p, i)).collect();

        let n = processes.len();
        let mut values = vec![vec![0u64; n]; n];
        for ((sender, receiver), tally) in self.tallies(output) {
            if let (Some(&s), Some(&r)) = (position.get(sender), position.get(receiver)) {
                values[s][r] += tally.value(output);
            }
        }

        CommMatrix {
            output,
            processes,
            values,
        }
    }

    /// Per-process totals from row and column sums
    pub fn by_process(&self) -> Vec<ProcessComm> {
        let bytes = self.to_matrix(CommOutput::Size);
        let counts = self.to_matrix(CommOutput::Count);

        bytes
            .processes
            .iter()
            .enumerate()
            .map(|(i, &process)| ProcessComm {
                process,
                sent: bytes.row_sum(i),
                received: bytes.column_sum(i),
                messages_sent: counts.row_sum(i),
                messages_received: counts.column_sum(i),
            })
            .collect()
    }
}

/// Square `[sender][receiver]` matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommMatrix {
    pub output: CommOutput,
    /// Process id of each row/column, ascending
    pub processes: Vec<u32>,
    pub values: Vec<Vec<u64>>,
}

impl CommMatrix {
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Cell addressed by process ids
    pub fn get(&self, sender: u32, receiver: u32) -> Option<u64> {
        let s = self.processes.binary_search(&sender).ok()?;
        let r = self.processes.binary_search(&receiver).ok()?;
        Some(self.values[s][r])
    }

    pub fn total(&self) -> u64 {
        self.values.iter().flatten().sum()
    }

    pub fn row_sum(&self, index: usize) -> u64 {
        self.values.get(index).map(|row| row.iter().sum()).unwrap_or(0)
    }

    pub fn column_sum(&self, index: usize) -> u64 {
        self.values
            .iter()
            .filter_map(|row| row.get(index))
            .sum()
    }
}

impl Index<usize> for CommMatrix {
    type Output = [u64];

    fn index(&self, sender: usize) -> &[u64] {
        &self.values[sender]
    }
}

/// Communication totals of one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessComm {
    pub process: u32,
    /// Bytes sent
    pub sent: u64,
    /// Bytes received
    pub received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Communication matrix of a single stream
pub fn comm_matrix(stream: &EventStream, output: CommOutput) -> CommMatrix {
    CommPartial::from_stream(stream).to_matrix(output)
}

/// Per-process totals of a single stream
pub fn comm_by_process(stream: &EventStream) -> Vec<ProcessComm> {
    CommPartial::from_stream(stream).by_process()
}
