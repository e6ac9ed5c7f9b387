//! Typed lock-free queues between a realtime thread and a control thread.
//!
//! Built on the index controllers from `vvring-fifo`:
//!
//! - [`TypedQueue`]: fixed-capacity FIFO of owned values
//! - [`midi`]: MIDI messages from the audio thread to a display history
//! - [`command`]: closures run on the realtime thread, freed off it
//! - [`channels`]: both directions bundled per thread

pub mod channels;
pub mod command;
pub mod midi;
pub mod queue;

pub use channels::{ControlChannels, RealtimeChannels, create_channels, default_channels};
pub use command::{
    BoxedCommand, Command, CommandReceiver, CommandSender, FnCommand, SharedCommandSender,
    command_fifo, default_command_fifo,
};
pub use midi::{
    MidiHistory, MidiMessage, MidiQueue, MidiReceiver, MidiSender, default_midi_queue, midi_queue,
};
pub use queue::{Drain, QueueConsumer, QueueProducer, TypedQueue};
