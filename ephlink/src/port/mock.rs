//! Scripted transport for unit tests.

use {
    crate::{
        error::{Error, Result},
        port::{LinkLimits, ReadyLine, Transport},
        protocol::tlv::HEADER_SIZE,
    },
    std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    },
};

/// Route library logs to the test harness; `RUST_LOG=trace` shows wire bytes.
pub(crate) fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Write(Vec<u8>),
    Read(usize),
}

#[derive(Default)]
struct State {
    reads: VecDeque<Result<Vec<u8>>>,
    write_failures: usize,
    ops: Vec<Op>,
}

/// Transport answering reads from a queue of chunks.
///
/// Each read pops one chunk and zero-pads it to the requested length; an
/// empty queue reads as all zeros (the null report). Clones share state.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Queue a raw read chunk.
    pub(crate) fn push_chunk(&self, chunk: &[u8]) {
        self.state().reads.push_back(Ok(chunk.to_vec()));
    }

    /// Queue a complete message for one two-stage read.
    pub(crate) fn push_message(&self, message: &[u8]) {
        self.push_chunk(&message[..HEADER_SIZE.min(message.len())]);
        self.push_chunk(message);
    }

    /// Queue a not-ready answer for one read.
    pub(crate) fn push_not_ready(&self) {
        self.push_chunk(&[0, 0, 0]);
    }

    /// Queue a failing read.
    pub(crate) fn push_read_error(&self) {
        self.state()
            .reads
            .push_back(Err(Error::Transport("scripted read failure".into())));
    }

    /// Fail the next `count` writes.
    pub(crate) fn fail_writes(&self, count: usize) {
        self.state().write_failures = count;
    }

    pub(crate) fn ops(&self) -> Vec<Op> {
        self.state().ops.clone()
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.state()
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Write(bytes) => Some(bytes.clone()),
                Op::Read(_) => None,
            })
            .collect()
    }

    pub(crate) fn reads_pending(&self) -> usize {
        self.state().reads.len()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let mut state = self.state();
        state.ops.push(Op::Write(buf.to_vec()));
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(Error::Transport("scripted write failure".into()));
        }
        Ok(())
    }

    fn read(&mut self, out: &mut [u8]) -> Result<()> {
        let mut state = self.state();
        state.ops.push(Op::Read(out.len()));
        out.fill(0);
        match state.reads.pop_front() {
            Some(Ok(chunk)) => {
                let n = chunk.len().min(out.len());
                out[..n].copy_from_slice(&chunk[..n]);
                Ok(())
            },
            Some(Err(e)) => Err(e),
            None => Ok(()),
        }
    }

    fn limits(&self) -> LinkLimits {
        LinkLimits::SPI
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Ready line following a scripted sequence, then a fixed level.
#[derive(Clone, Default)]
pub(crate) struct MockReadyLine {
    levels: Arc<Mutex<(VecDeque<bool>, bool, usize)>>,
}

impl MockReadyLine {
    pub(crate) fn new(settled: bool) -> Self {
        Self {
            levels: Arc::new(Mutex::new((VecDeque::new(), settled, 0))),
        }
    }

    pub(crate) fn push(&self, level: bool) {
        self.levels.lock().unwrap().0.push_back(level);
    }

    pub(crate) fn releases(&self) -> usize {
        self.levels.lock().unwrap().2
    }
}

impl ReadyLine for MockReadyLine {
    fn is_ready(&mut self) -> Result<bool> {
        let mut levels = self.levels.lock().unwrap();
        let settled = levels.1;
        Ok(levels.0.pop_front().unwrap_or(settled))
    }

    fn release(&mut self) -> Result<()> {
        self.levels.lock().unwrap().2 += 1;
        Ok(())
    }
}
