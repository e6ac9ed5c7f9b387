//! MIDI message queue from the audio thread to a display.
//!
//! The audio side pushes every message of a processing block into its own
//! slot; the UI side periodically drains the queue into a [`MidiHistory`],
//! which keeps only the newest messages for display.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use vvring_core::{Result, capacities};

use crate::queue::{Drain, QueueConsumer, QueueProducer, TypedQueue};

/// Queue specialized for MIDI messages
pub type MidiQueue = TypedQueue<MidiMessage>;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A raw MIDI message with a timestamp.
///
/// Up to three bytes are stored inline, so channel voice messages never touch
/// the heap; longer messages (SysEx) spill to an allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiMessage {
    bytes: SmallVec<[u8; 3]>,
    /// Seconds, or samples from the start of the block, at the caller's choice
    timestamp: f64,
}

impl MidiMessage {
    /// Wrap raw bytes
    pub fn from_bytes(bytes: &[u8], timestamp: f64) -> Self {
        Self {
            bytes: SmallVec::from_slice(bytes),
            timestamp,
        }
    }

    /// Note on; `channel` is 0-15
    pub fn note_on(channel: u8, note: u8, velocity: u8, timestamp: f64) -> Self {
        Self::channel_message(0x90, channel, &[note & 0x7F, velocity & 0x7F], timestamp)
    }

    /// Note off; `channel` is 0-15
    pub fn note_off(channel: u8, note: u8, velocity: u8, timestamp: f64) -> Self {
        Self::channel_message(0x80, channel, &[note & 0x7F, velocity & 0x7F], timestamp)
    }

    /// Control change; `channel` is 0-15
    pub fn controller(channel: u8, controller: u8, value: u8, timestamp: f64) -> Self {
        Self::channel_message(0xB0, channel, &[controller & 0x7F, value & 0x7F], timestamp)
    }

    /// Program change; `channel` is 0-15
    pub fn program_change(channel: u8, program: u8, timestamp: f64) -> Self {
        Self::channel_message(0xC0, channel, &[program & 0x7F], timestamp)
    }

    /// Pitch wheel, `value` in 0..=16383 with 8192 as centre
    pub fn pitch_wheel(channel: u8, value: u16, timestamp: f64) -> Self {
        let value = value.min(0x3FFF);
        Self::channel_message(
            0xE0,
            channel,
            &[(value & 0x7F) as u8, (value >> 7) as u8],
            timestamp,
        )
    }

    fn channel_message(status: u8, channel: u8, data: &[u8], timestamp: f64) -> Self {
        let mut bytes = SmallVec::new();
        bytes.push(status | (channel & 0x0F));
        bytes.extend_from_slice(data);
        Self { bytes, timestamp }
    }

    /// Raw bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Timestamp given at construction
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Same message at another time
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Status byte, if any
    pub fn status(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    /// Channel 0-15 for channel voice messages
    pub fn channel(&self) -> Option<u8> {
        self.status()
            .filter(|status| (0x80..0xF0).contains(status))
            .map(|status| status & 0x0F)
    }

    /// True when the message lives entirely inline
    pub fn is_inline(&self) -> bool {
        !self.bytes.spilled()
    }

    fn data(&self, index: usize) -> u8 {
        self.bytes.get(index + 1).copied().unwrap_or(0)
    }

    /// Human readable summary, e.g. `Note on C3 Velocity 100 Channel 1`
    pub fn description(&self) -> String {
        let Some(status) = self.status() else {
            return String::from("Empty message");
        };
        let channel = u32::from(status & 0x0F) + 1;

        match status & 0xF0 {
            0x80 => format!(
                "Note off {} Velocity {} Channel {channel}",
                note_name(self.data(0)),
                self.data(1)
            ),
            // Velocity zero is a note off by convention
            0x90 if self.data(1) == 0 => format!(
                "Note off {} Velocity 0 Channel {channel}",
                note_name(self.data(0))
            ),
            0x90 => format!(
                "Note on {} Velocity {} Channel {channel}",
                note_name(self.data(0)),
                self.data(1)
            ),
            0xA0 => format!(
                "Aftertouch {}: {} Channel {channel}",
                note_name(self.data(0)),
                self.data(1)
            ),
            0xB0 => format!(
                "Controller {}: {} Channel {channel}",
                self.data(0),
                self.data(1)
            ),
            0xC0 => format!("Program change {} Channel {channel}", self.data(0)),
            0xD0 => format!("Channel pressure {} Channel {channel}", self.data(0)),
            0xE0 => format!(
                "Pitch wheel {} Channel {channel}",
                u16::from(self.data(0)) | (u16::from(self.data(1)) << 7)
            ),
            _ if status == 0xF0 => format!("SysEx ({} bytes)", self.bytes.len()),
            _ => self
                .bytes
                .iter()
                .map(|byte| format!("{byte:02X}"))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Note name with middle C (60) as C3
fn note_name(note: u8) -> String {
    let octave = i32::from(note / 12) - 2;
    format!("{}{octave}", NOTE_NAMES[usize::from(note % 12)])
}

/// Create a MIDI queue with `capacity` slots
pub fn midi_queue(capacity: usize) -> Result<(MidiSender, MidiReceiver)> {
    let (producer, consumer) = MidiQueue::new(capacity)?;
    Ok((MidiSender { producer }, MidiReceiver { consumer }))
}

/// Create a MIDI queue with the default number of slots
pub fn default_midi_queue() -> Result<(MidiSender, MidiReceiver)> {
    midi_queue(capacities::MIDI_QUEUE)
}

/// Audio-thread end of a MIDI queue
#[derive(Debug)]
pub struct MidiSender {
    producer: QueueProducer<MidiMessage>,
}

impl MidiSender {
    /// Queue one message; dropped when the queue is full
    pub fn push(&mut self, message: MidiMessage) -> bool {
        self.producer.push(message)
    }

    /// Queue every message of a block, each in its own slot.
    /// Returns how many were stored.
    pub fn push_block<I>(&mut self, messages: I) -> usize
    where
        I: IntoIterator<Item = MidiMessage>,
    {
        self.producer.push_all(messages)
    }

    /// Free slots right now
    pub fn free_slots(&self) -> usize {
        self.producer.free_slots()
    }
}

/// UI-thread end of a MIDI queue
#[derive(Debug)]
pub struct MidiReceiver {
    consumer: QueueConsumer<MidiMessage>,
}

impl MidiReceiver {
    /// Move everything queued into `history`; returns the number drained
    pub fn pop_into(&mut self, history: &mut MidiHistory) -> usize {
        history.add_messages(self.consumer.pop_all())
    }

    /// Take everything queued at the time of the call
    pub fn drain(&mut self) -> Drain<'_, MidiMessage> {
        self.consumer.pop_all()
    }

    /// Messages waiting
    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }
}

/// The newest N messages, for display. Lives on the UI thread.
#[derive(Debug, Clone, Serialize)]
pub struct MidiHistory {
    messages: VecDeque<MidiMessage>,
    limit: usize,
    revision: u64,
}

impl MidiHistory {
    /// Keep at most `limit` messages
    pub fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(limit),
            limit,
            revision: 0,
        }
    }

    /// Append messages, discarding the oldest beyond the limit.
    /// Returns the number of messages offered.
    pub fn add_messages<I>(&mut self, messages: I) -> usize
    where
        I: IntoIterator<Item = MidiMessage>,
    {
        let mut added = 0;
        for message in messages {
            if self.messages.len() == self.limit {
                self.messages.pop_front();
            }
            if self.limit > 0 {
                self.messages.push_back(message);
            }
            added += 1;
        }

        if added > 0 {
            self.revision += 1;
        }
        added
    }

    /// Forget every message
    pub fn clear(&mut self) {
        self.messages.clear();
        self.revision += 1;
    }

    /// Number of retained messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when nothing is retained
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Retained message at `index`, oldest first
    pub fn get(&self, index: usize) -> Option<&MidiMessage> {
        self.messages.get(index)
    }

    /// Retained messages, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &MidiMessage> {
        self.messages.iter()
    }

    /// Maximum number of retained messages
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bumped on every change; compare with a remembered value to redraw
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl Default for MidiHistory {
    fn default() -> Self {
        Self::new(capacities::MIDI_HISTORY)
    }
}
