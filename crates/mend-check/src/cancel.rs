//! Interactive cancellation.
//!
//! The SIGINT handler does exactly one thing: set an atomic pending flag.
//! Everything else — draining stale input, prompting the operator,
//! setting the cooperative skip/abort flags — runs on the main thread at
//! the poll points inside each pass's scan loop. Passes are long
//! synchronous sweeps, so cancellation is cooperative, not preemptive:
//! the flags are observed before the next block or structural unit, never
//! mid-unit.
//!
//! The prompt machine walks Idle → Draining → Prompting → Resolved. An
//! interrupt that arrives while an operator question is already pending is
//! dropped when the question resolves, which suppresses re-entry exactly
//! as a pending query should.

use crate::context::PassState;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flags.
///
/// `interrupt_pending` is the only field the signal path touches; the
/// rest are written by the main thread while handling the prompt and read
/// back at poll points.
#[derive(Debug)]
pub struct CancelFlags {
    interrupt_pending: Arc<AtomicBool>,
    skip_current_pass: AtomicBool,
    abort_all: AtomicBool,
    query_active: AtomicBool,
}

impl Default for CancelFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelFlags {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interrupt_pending: Arc::new(AtomicBool::new(false)),
            skip_current_pass: AtomicBool::new(false),
            abort_all: AtomicBool::new(false),
            query_active: AtomicBool::new(false),
        }
    }

    /// Handle for the signal registration: the handler sets this flag and
    /// nothing else.
    #[must_use]
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt_pending)
    }

    /// Simulate an operator interrupt (tests).
    pub fn request_interrupt(&self) {
        self.interrupt_pending.store(true, Ordering::SeqCst);
    }

    /// Consume a pending interrupt, if any.
    pub fn take_interrupt(&self) -> bool {
        self.interrupt_pending.swap(false, Ordering::SeqCst)
    }

    /// Drop a pending interrupt without acting on it.
    pub fn discard_interrupt(&self) {
        self.interrupt_pending.store(false, Ordering::SeqCst);
    }

    pub fn set_skip(&self) {
        self.skip_current_pass.store(true, Ordering::SeqCst);
    }

    pub fn clear_skip(&self) {
        self.skip_current_pass.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn skip_requested(&self) -> bool {
        self.skip_current_pass.load(Ordering::SeqCst)
    }

    pub fn set_abort(&self) {
        self.abort_all.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn abort_requested(&self) -> bool {
        self.abort_all.load(Ordering::SeqCst)
    }

    /// True if the current pass should stop early.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.skip_requested() || self.abort_requested()
    }

    pub fn set_query_active(&self, active: bool) {
        self.query_active.store(active, Ordering::SeqCst);
    }

    #[must_use]
    pub fn query_active(&self) -> bool {
        self.query_active.load(Ordering::SeqCst)
    }
}

/// Register the SIGINT handler.
///
/// The handler only stores `true` into the pending flag; it never prompts,
/// allocates, or touches checker state.
pub fn register_sigint(flags: &CancelFlags) -> io::Result<signal_hook::SigId> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, flags.interrupt_flag())
}

/// Operator input source for interrupt and repair prompts.
///
/// Abstracted so tests can script responses; production uses stdin.
pub trait ControlChannel {
    /// Discard any input already buffered on the channel, without blocking.
    fn drain(&mut self);

    /// Blocking line read. Returns the number of bytes read (0 at EOF).
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize>;
}

/// Stdin-backed control channel.
#[derive(Debug, Default)]
pub struct StdinChannel;

impl ControlChannel for StdinChannel {
    fn drain(&mut self) {
        // Stdin cannot be peeked without blocking from safe code; stale
        // bytes on the same line are discarded by the line-oriented reads
        // below, which is the part of the drain that matters for a
        // terminal.
    }

    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        io::stderr().flush()?;
        io::stdin().lock().read_line(buf)
    }
}

/// Scripted control channel for tests.
#[derive(Debug, Default)]
pub struct ScriptChannel {
    responses: VecDeque<String>,
    drains: u32,
}

impl ScriptChannel {
    #[must_use]
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            drains: 0,
        }
    }

    /// Number of times the prompt drained the channel.
    #[must_use]
    pub fn drains(&self) -> u32 {
        self.drains
    }
}

impl ControlChannel for ScriptChannel {
    fn drain(&mut self) {
        self.drains += 1;
    }

    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        match self.responses.pop_front() {
            Some(mut line) => {
                if !line.ends_with('\n') {
                    line.push('\n');
                }
                buf.push_str(&line);
                Ok(line.len())
            }
            None => Ok(0),
        }
    }
}

/// Prompt machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    Idle,
    Draining,
    Prompting,
    Resolved,
}

/// Operator's answer to the interrupt prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptDecision {
    Abort,
    SkipPass,
    Continue,
}

/// Run the interrupt prompt to resolution.
///
/// Blocks indefinitely until the operator answers `a`, `s`, or `c`; any
/// other input re-prompts after an error message. Sets the corresponding
/// cooperative flag before returning. EOF on the channel resolves as
/// `Continue` so a detached stdin cannot wedge the run.
pub fn run_interrupt_prompt(
    state: &PassState,
    flags: &CancelFlags,
    channel: &mut dyn ControlChannel,
) -> io::Result<InterruptDecision> {
    let mut machine = PromptState::Idle;
    let mut decision = InterruptDecision::Continue;

    loop {
        match machine {
            PromptState::Idle => {
                machine = PromptState::Draining;
            }
            PromptState::Draining => {
                channel.drain();
                machine = PromptState::Prompting;
            }
            PromptState::Prompting => {
                eprint!("\nfsmend interrupted in {}: ", state.pass);
                if state.last_reported_block == 0
                    || state.last_reported_block == state.last_fs_block
                {
                    eprintln!("progress unknown.");
                } else {
                    eprintln!(
                        "processing block {} out of {}",
                        state.last_reported_block, state.last_fs_block
                    );
                }
                eprint!(
                    "Do you want to abort fsmend, skip the rest of {} or continue (a/s/c)? ",
                    state.pass
                );

                let mut line = String::new();
                let read = channel.read_line(&mut line)?;
                if read == 0 {
                    eprintln!("\nend of input; continuing.");
                    decision = InterruptDecision::Continue;
                    machine = PromptState::Resolved;
                    continue;
                }

                match line.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
                    Some('a') => {
                        flags.set_abort();
                        decision = InterruptDecision::Abort;
                        machine = PromptState::Resolved;
                    }
                    Some('s') => {
                        flags.set_skip();
                        decision = InterruptDecision::SkipPass;
                        machine = PromptState::Resolved;
                    }
                    Some('c') => {
                        decision = InterruptDecision::Continue;
                        machine = PromptState::Resolved;
                    }
                    _ => {
                        eprintln!("Bad response, please type 'c', 'a' or 's'.");
                    }
                }
            }
            PromptState::Resolved => return Ok(decision),
        }
    }
}
