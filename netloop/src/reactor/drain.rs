//! Edge-triggered drain protocol for connection channels.
//!
//! An edge-triggered descriptor only reports readiness again after new data
//! arrives, so one notification must be consumed completely: read until the
//! socket would block, accumulating every partial read, then deliver the
//! accumulated bytes once.

use super::buffer::Buffer;
use super::channel::{CloseReason, Outcome};
use super::poller::platform::{RawFd, sys_read};

use std::io;

/// Size of a single read issued while draining.
pub(crate) const READ_WINDOW: usize = 1024;

/// Drains `fd` into `buffer`, handing each completed chunk to `on_chunk`.
pub(crate) fn drain_fd(fd: RawFd, buffer: &mut Buffer, on_chunk: impl FnMut(&[u8])) -> Outcome {
    drain_with(
        |window| {
            let n = sys_read(fd, window);
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        },
        buffer,
        on_chunk,
    )
}

/// Runs the drain protocol over an arbitrary read function.
///
/// | read result   | action                                         |
/// |---------------|------------------------------------------------|
/// | `Ok(n > 0)`   | append, keep reading                           |
/// | `Ok(0)`       | flush what was gathered, report peer close     |
/// | would-block   | flush what was gathered, drain complete        |
/// | interrupted   | retry                                          |
/// | other error   | flush what was gathered, report I/O close      |
///
/// The callback fires at most once per call, and only with a non-empty
/// chunk.
pub(crate) fn drain_with<R, F>(mut read: R, buffer: &mut Buffer, mut on_chunk: F) -> Outcome
where
    R: FnMut(&mut [u8]) -> io::Result<usize>,
    F: FnMut(&[u8]),
{
    let mut window = [0u8; READ_WINDOW];

    loop {
        match read(&mut window) {
            Ok(0) => {
                flush(buffer, &mut on_chunk);
                return Outcome::Closed(CloseReason::Peer);
            }
            Ok(n) => {
                buffer.append(&window[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                flush(buffer, &mut on_chunk);
                return Outcome::Drained;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                flush(buffer, &mut on_chunk);
                return Outcome::Closed(CloseReason::Io(e));
            }
        }
    }
}

fn flush(buffer: &mut Buffer, on_chunk: &mut impl FnMut(&[u8])) {
    if buffer.is_empty() {
        return;
    }

    on_chunk(buffer.as_slice());
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    enum Step {
        Data(Vec<u8>),
        WouldBlock,
        Interrupted,
        Eof,
        Fail,
    }

    /// Replays a fixed sequence of read results, recording every read size.
    struct Script {
        steps: VecDeque<Step>,
        reads: Vec<usize>,
    }

    impl Script {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                reads: Vec::new(),
            }
        }

        fn read(&mut self, window: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front().expect("read past end of script") {
                Step::Data(mut data) => {
                    let n = data.len().min(window.len());
                    window[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.steps.push_front(Step::Data(data.split_off(n)));
                    }
                    self.reads.push(n);
                    Ok(n)
                }
                Step::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
                Step::Interrupted => Err(io::ErrorKind::Interrupted.into()),
                Step::Eof => Ok(0),
                Step::Fail => Err(io::Error::from_raw_os_error(libc::ECONNRESET)),
            }
        }
    }

    fn run(script: &mut Script, buffer: &mut Buffer) -> (Outcome, Vec<Vec<u8>>) {
        let mut chunks = Vec::new();
        let outcome = drain_with(|w| script.read(w), buffer, |c| chunks.push(c.to_vec()));
        (outcome, chunks)
    }

    #[test]
    fn test_short_message_flushed_once_on_would_block() {
        let mut script = Script::new(vec![Step::Data(b"hello".to_vec()), Step::WouldBlock]);
        let mut buffer = Buffer::new();

        let (outcome, chunks) = run(&mut script, &mut buffer);

        assert!(matches!(outcome, Outcome::Drained));
        assert_eq!(chunks, vec![b"hello".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_large_write_needs_two_windows() {
        let payload: Vec<u8> = (0..2000).map(|i| (i % 251) as u8).collect();
        let mut script = Script::new(vec![Step::Data(payload.clone()), Step::WouldBlock]);
        let mut buffer = Buffer::new();

        let (outcome, chunks) = run(&mut script, &mut buffer);

        assert!(matches!(outcome, Outcome::Drained));
        assert_eq!(script.reads, vec![1024, 976]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], payload);
    }

    #[test]
    fn test_partial_reads_are_concatenated() {
        let mut script = Script::new(vec![
            Step::Data(b"ab".to_vec()),
            Step::Interrupted,
            Step::Data(b"cd".to_vec()),
            Step::Data(b"e".to_vec()),
            Step::WouldBlock,
        ]);
        let mut buffer = Buffer::new();

        let (_, chunks) = run(&mut script, &mut buffer);

        assert_eq!(chunks, vec![b"abcde".to_vec()]);
    }

    #[test]
    fn test_spurious_wakeup_delivers_nothing() {
        let mut script = Script::new(vec![Step::WouldBlock]);
        let mut buffer = Buffer::new();

        let (outcome, chunks) = run(&mut script, &mut buffer);

        assert!(matches!(outcome, Outcome::Drained));
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_immediate_eof_reports_peer_close_without_data() {
        let mut script = Script::new(vec![Step::Eof]);
        let mut buffer = Buffer::new();

        let (outcome, chunks) = run(&mut script, &mut buffer);

        assert!(matches!(outcome, Outcome::Closed(CloseReason::Peer)));
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_data_before_eof_is_not_lost() {
        let mut script = Script::new(vec![Step::Data(b"bye".to_vec()), Step::Eof]);
        let mut buffer = Buffer::new();

        let (outcome, chunks) = run(&mut script, &mut buffer);

        assert!(matches!(outcome, Outcome::Closed(CloseReason::Peer)));
        assert_eq!(chunks, vec![b"bye".to_vec()]);
    }

    #[test]
    fn test_unexpected_error_closes_connection() {
        let mut script = Script::new(vec![Step::Fail]);
        let mut buffer = Buffer::new();

        let (outcome, _) = run(&mut script, &mut buffer);

        match outcome {
            Outcome::Closed(CloseReason::Io(e)) => {
                assert_eq!(e.raw_os_error(), Some(libc::ECONNRESET))
            }
            _ => panic!("expected an I/O close"),
        }
    }
}
