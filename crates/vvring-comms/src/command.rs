//! Commands executed on the realtime thread.
//!
//! A control thread boxes a command and pushes it into a [`CommandSender`];
//! the realtime thread calls [`CommandReceiver::call`] once per block to run
//! everything queued. A command is never freed on the realtime thread: once it
//! has run, the box travels back over a return queue and is dropped by the
//! control thread the next time it pushes or calls
//! [`CommandSender::collect_garbage`].

use std::sync::Arc;

use parking_lot::Mutex;
use vvring_core::{Result, capacities};

use crate::queue::{QueueConsumer, QueueProducer, TypedQueue};

/// Work to run against the realtime context `C`.
///
/// `run` is called at most once per queued command, on the realtime thread,
/// so it must not block or allocate.
pub trait Command<C>: Send {
    /// Apply the command to the realtime context
    fn run(&mut self, context: &mut C);
}

/// A queued command
pub type BoxedCommand<C> = Box<dyn Command<C>>;

/// Adapts a one-shot closure to [`Command`].
///
/// Captured values the closure consumes are dropped on the realtime thread;
/// move anything expensive to free into the context instead.
pub struct FnCommand<F> {
    func: Option<F>,
}

impl<F> FnCommand<F> {
    /// Wrap `func`; later calls to `run` after the first do nothing.
    ///
    /// ```
    /// use vvring_comms::{Command, FnCommand};
    ///
    /// let mut command = FnCommand::new(|total: &mut u32| *total += 1);
    /// let mut total = 0;
    /// command.run(&mut total);
    /// command.run(&mut total);
    /// assert_eq!(total, 1);
    /// ```
    pub fn new(func: F) -> Self {
        Self { func: Some(func) }
    }
}

impl<C, F> Command<C> for FnCommand<F>
where
    F: FnOnce(&mut C) + Send,
{
    fn run(&mut self, context: &mut C) {
        if let Some(func) = self.func.take() {
            func(context);
        }
    }
}

/// Create a command FIFO with room for `capacity` pending commands
pub fn command_fifo<C: 'static>(
    capacity: usize,
) -> Result<(CommandSender<C>, CommandReceiver<C>)> {
    let (command_tx, command_rx) = TypedQueue::new(capacity)?;
    // Spent commands may pile up while the control thread is idle
    let (spent_tx, spent_rx) = TypedQueue::new(capacity.saturating_mul(2))?;

    Ok((
        CommandSender {
            commands: command_tx,
            spent: spent_rx,
            rejected: 0,
        },
        CommandReceiver {
            commands: command_rx,
            spent: spent_tx,
            dropped_in_place: 0,
        },
    ))
}

/// Create a command FIFO with the default capacity
pub fn default_command_fifo<C: 'static>() -> Result<(CommandSender<C>, CommandReceiver<C>)> {
    command_fifo(capacities::COMMAND_QUEUE)
}

/// Control-thread end of a command FIFO
pub struct CommandSender<C> {
    commands: QueueProducer<BoxedCommand<C>>,
    spent: QueueConsumer<BoxedCommand<C>>,
    rejected: u64,
}

impl<C: 'static> CommandSender<C> {
    /// Queue a closure. Returns false if the queue is full.
    pub fn push<F>(&mut self, func: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.push_command(Box::new(FnCommand::new(func)))
    }

    /// Queue a boxed command. Returns false if the queue is full.
    pub fn push_command(&mut self, command: BoxedCommand<C>) -> bool {
        self.collect_garbage();

        match self.commands.try_push(command) {
            Ok(()) => true,
            Err(_command) => {
                self.rejected += 1;
                tracing::warn!(
                    capacity = self.commands.capacity(),
                    "Command queue full, dropping command"
                );
                false
            }
        }
    }

    /// Free commands the realtime thread has finished with.
    /// Returns how many were freed.
    pub fn collect_garbage(&mut self) -> usize {
        self.spent.pop_all().count()
    }

    /// Commands queued but not yet run
    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    /// Commands refused because the queue was full
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Maximum number of pending commands
    pub fn capacity(&self) -> usize {
        self.commands.capacity()
    }
}

impl<C> std::fmt::Debug for CommandSender<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("pending", &self.commands.len())
            .field("spent", &self.spent.len())
            .field("rejected", &self.rejected)
            .finish()
    }
}

/// Realtime-thread end of a command FIFO
pub struct CommandReceiver<C> {
    commands: QueueConsumer<BoxedCommand<C>>,
    spent: QueueProducer<BoxedCommand<C>>,
    dropped_in_place: u64,
}

impl<C> CommandReceiver<C> {
    /// Run every command queued at the time of the call, in order.
    /// Returns the number run.
    pub fn call(&mut self, context: &mut C) -> usize {
        let mut executed = 0;
        for mut command in self.commands.pop_all() {
            command.run(context);
            executed += 1;

            if let Err(command) = self.spent.try_push(command) {
                // Return queue full: the control thread stopped collecting
                self.dropped_in_place += 1;
                drop(command);
            }
        }
        executed
    }

    /// Commands waiting to run
    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    /// Spent commands freed here because the return queue was full
    pub fn dropped_in_place(&self) -> u64 {
        self.dropped_in_place
    }
}

impl<C> std::fmt::Debug for CommandReceiver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandReceiver")
            .field("pending", &self.commands.len())
            .field("dropped_in_place", &self.dropped_in_place)
            .finish()
    }
}

/// A sender shared by several control threads.
///
/// Producers serialize on a mutex; the realtime consumer never touches it.
pub struct SharedCommandSender<C> {
    inner: Arc<Mutex<CommandSender<C>>>,
}

impl<C: 'static> SharedCommandSender<C> {
    /// Wrap `sender` so clones can push from any control thread
    pub fn new(sender: CommandSender<C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sender)),
        }
    }

    /// Queue a closure. Returns false if the queue is full.
    pub fn push<F>(&self, func: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.inner.lock().push(func)
    }

    /// Queue a boxed command. Returns false if the queue is full.
    pub fn push_command(&self, command: BoxedCommand<C>) -> bool {
        self.inner.lock().push_command(command)
    }

    /// Free spent commands
    pub fn collect_garbage(&self) -> usize {
        self.inner.lock().collect_garbage()
    }

    /// Commands queued but not yet run
    pub fn pending(&self) -> usize {
        self.inner.lock().pending()
    }
}

impl<C> Clone for SharedCommandSender<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> From<CommandSender<C>> for SharedCommandSender<C>
where
    C: 'static,
{
    fn from(sender: CommandSender<C>) -> Self {
        Self::new(sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Voices {
        gain: f32,
        log: Vec<u32>,
    }

    /// Records which thread dropped it
    struct DropProbe {
        drops: Arc<AtomicUsize>,
    }

    impl Command<Voices> for DropProbe {
        fn run(&mut self, context: &mut Voices) {
            context.log.push(99);
        }
    }

    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_commands_run_in_order() {
        let (mut tx, mut rx) = command_fifo::<Voices>(8).unwrap();
        for i in 0..5 {
            assert!(tx.push(move |voices: &mut Voices| voices.log.push(i)));
        }
        assert_eq!(tx.pending(), 5);

        let mut voices = Voices::default();
        assert_eq!(rx.call(&mut voices), 5);
        assert_eq!(voices.log, vec![0, 1, 2, 3, 4]);
        assert_eq!(rx.pending(), 0);

        // Nothing left to run
        assert_eq!(rx.call(&mut voices), 0);
    }

    #[test]
    fn test_full_queue_rejects() {
        let (mut tx, mut rx) = command_fifo::<Voices>(2).unwrap();
        assert!(tx.push(|v: &mut Voices| v.gain = 0.5));
        assert!(tx.push(|v: &mut Voices| v.gain = 0.25));
        assert!(!tx.push(|v: &mut Voices| v.gain = 1.0));
        assert_eq!(tx.rejected(), 1);

        let mut voices = Voices::default();
        rx.call(&mut voices);
        assert_eq!(voices.gain, 0.25);
    }

    #[test]
    fn test_spent_commands_freed_by_sender() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (mut tx, mut rx) = command_fifo::<Voices>(4).unwrap();

        for _ in 0..3 {
            tx.push_command(Box::new(DropProbe {
                drops: Arc::clone(&drops),
            }));
        }

        let mut voices = Voices::default();
        assert_eq!(rx.call(&mut voices), 3);
        assert_eq!(voices.log, vec![99, 99, 99]);

        // Run but still alive, waiting in the return queue
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        assert_eq!(tx.collect_garbage(), 3);
        assert_eq!(drops.load(Ordering::SeqCst), 3);
        assert_eq!(rx.dropped_in_place(), 0);
    }

    #[test]
    fn test_push_collects_garbage() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (mut tx, mut rx) = command_fifo::<Voices>(4).unwrap();

        tx.push_command(Box::new(DropProbe {
            drops: Arc::clone(&drops),
        }));
        rx.call(&mut Voices::default());
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        tx.push(|_: &mut Voices| {});
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_full_return_queue_drops_in_place() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (mut tx, mut rx) = command_fifo::<Voices>(1).unwrap();
        let mut voices = Voices::default();

        // Return queue holds two; the third spent command has nowhere to go
        for _ in 0..3 {
            tx.commands
                .try_push(Box::new(DropProbe {
                    drops: Arc::clone(&drops),
                }))
                .ok()
                .unwrap();
            rx.call(&mut voices);
        }

        assert_eq!(rx.dropped_in_place(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(tx.collect_garbage(), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unrun_commands_dropped_with_fifo() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (mut tx, rx) = command_fifo::<Voices>(4).unwrap();
        tx.push_command(Box::new(DropProbe {
            drops: Arc::clone(&drops),
        }));

        drop(rx);
        drop(tx);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fn_command_runs_once() {
        let mut command = FnCommand::new(|v: &mut Voices| v.log.push(1));
        let mut voices = Voices::default();
        command.run(&mut voices);
        command.run(&mut voices);
        assert_eq!(voices.log, vec![1]);
    }

    #[test]
    fn test_shared_sender_across_threads() {
        let (tx, mut rx) = command_fifo::<Voices>(64).unwrap();
        let shared = SharedCommandSender::from(tx);

        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for i in 0..8 {
                        assert!(shared.push(move |v: &mut Voices| v.log.push(t * 100 + i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(shared.pending(), 32);
        let mut voices = Voices::default();
        assert_eq!(rx.call(&mut voices), 32);

        // Each producer's commands stay in its own order
        for t in 0..4u32 {
            let mine: Vec<u32> = voices
                .log
                .iter()
                .copied()
                .filter(|v| v / 100 == t)
                .collect();
            assert_eq!(mine, (0..8).map(|i| t * 100 + i).collect::<Vec<_>>());
        }
        assert_eq!(shared.collect_garbage(), 32);
    }
}
