//! Paired endpoints for a control thread and a realtime thread.

use vvring_core::{Result, capacities};

use crate::command::{CommandReceiver, CommandSender, command_fifo};
use crate::midi::{MidiReceiver, MidiSender, midi_queue};

/// Create both directions at once: commands to the realtime thread and MIDI
/// back to the control thread.
pub fn create_channels<C: 'static>(
    command_capacity: usize,
    midi_capacity: usize,
) -> Result<(ControlChannels<C>, RealtimeChannels<C>)> {
    let (command_tx, command_rx) = command_fifo(command_capacity)?;
    let (midi_tx, midi_rx) = midi_queue(midi_capacity)?;

    tracing::debug!(command_capacity, midi_capacity, "Created realtime channels");

    let control = ControlChannels { command_tx, midi_rx };
    let realtime = RealtimeChannels { command_rx, midi_tx };

    Ok((control, realtime))
}

/// [`create_channels`] with the default capacities
pub fn default_channels<C: 'static>() -> Result<(ControlChannels<C>, RealtimeChannels<C>)> {
    create_channels(capacities::COMMAND_QUEUE, capacities::MIDI_QUEUE)
}

/// Channels for the control thread (sends commands, receives MIDI)
#[derive(Debug)]
pub struct ControlChannels<C> {
    /// Command sender (control -> realtime)
    pub command_tx: CommandSender<C>,
    /// MIDI receiver (realtime -> control)
    pub midi_rx: MidiReceiver,
}

/// Channels for the realtime thread (runs commands, sends MIDI)
#[derive(Debug)]
pub struct RealtimeChannels<C> {
    /// Command receiver (control -> realtime)
    pub command_rx: CommandReceiver<C>,
    /// MIDI sender (realtime -> control); `push` never blocks
    pub midi_tx: MidiSender,
}
