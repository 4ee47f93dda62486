//! Threaded transport discipline.
//!
//! One background thread continuously drains the port into a bounded
//! channel; a second thread drains the channel and hands complete frames
//! to a handler. The handler is installed once, by ownership transfer,
//! when the pair is spawned; there is no way to swap it afterwards.
//!
//! The port must have a read timeout configured, or the reader thread
//! cannot notice a stop request between bytes.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::warn;

use crate::protocol::framing::FrameBuffer;
use crate::protocol::READ_CHUNK;

/// Bound on raw chunks queued between the reader and the dispatcher.
const QUEUE_DEPTH: usize = 32;

/// Receives complete, unstuffed frame payloads from the dispatcher
/// thread.
pub trait FrameHandler: Send + 'static {
    fn on_frame(&mut self, payload: Vec<u8>);
}

impl<T> FrameHandler for T
where
    T: FnMut(Vec<u8>) + Send + 'static,
{
    fn on_frame(&mut self, payload: Vec<u8>) {
        self(payload)
    }
}

/// The running reader/dispatcher thread pair.
#[derive(Debug)]
pub struct ReaderPair {
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

/// Drain a port into a queue until told to stop or the queue's other
/// end goes away.
fn spawn_reader<R>(mut port: R, tx: SyncSender<Vec<u8>>, stop: Arc<AtomicBool>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut chunk = [0u8; READ_CHUNK];
        while !stop.load(Ordering::Relaxed) {
            match port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    warn!("reader thread stopping: {}", e);
                    break;
                }
            }
        }
    })
}

/// Spawn the thread pair: `port` is drained into a bounded queue, and
/// `handler` sees every complete frame in arrival order.
pub fn spawn<R, H>(port: R, mut handler: H) -> ReaderPair
where
    R: Read + Send + 'static,
    H: FrameHandler,
{
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = sync_channel::<Vec<u8>>(QUEUE_DEPTH);
    let reader = spawn_reader(port, tx, stop.clone());

    let dispatcher = std::thread::spawn(move || {
        let mut buffer = FrameBuffer::new();
        while let Ok(bytes) = rx.recv() {
            buffer.extend(&bytes);
            while let Some(payload) = buffer.next_frame() {
                handler.on_frame(payload);
            }
        }
    });

    ReaderPair {
        stop,
        reader: Some(reader),
        dispatcher: Some(dispatcher),
    }
}

impl ReaderPair {
    /// Ask both threads to stop and wait for them.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReaderPair {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Adapts a reader-thread channel plus a writer back into a
/// [Read] + [Write] port, so the polling engines run unchanged on the
/// threaded discipline. Reads never block: with nothing queued they
/// report [ErrorKind::WouldBlock], which the engines treat as an empty
/// poll tick.
#[derive(Debug)]
pub struct ChannelPort<W> {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    writer: W,
}

impl<W> ChannelPort<W> {
    /// Spawn a reader thread for `reader` and pair its queue with
    /// `writer`. Returns the port and the running reader.
    pub fn spawn<R>(reader: R, writer: W) -> (Self, ReaderThread)
    where
        R: Read + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = sync_channel::<Vec<u8>>(QUEUE_DEPTH);
        let handle = spawn_reader(reader, tx, stop.clone());

        (
            Self {
                rx,
                pending: Vec::new(),
                writer,
            },
            ReaderThread {
                stop,
                handle: Some(handle),
            },
        )
    }
}

impl<W> Read for ChannelPort<W> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.rx.try_recv() {
                Ok(bytes) => self.pending.extend_from_slice(&bytes),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.pending.is_empty() {
                        return Err(std::io::Error::new(
                            ErrorKind::UnexpectedEof,
                            "reader thread gone",
                        ));
                    }
                    break;
                }
            }
        }

        if self.pending.is_empty() {
            return Err(ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl<W> Write for ChannelPort<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Handle to a [ChannelPort]'s reader thread.
#[derive(Debug)]
pub struct ReaderThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderThread {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReaderThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::framing::stuff;

    use std::sync::Mutex;

    /// A reader that yields scripted chunks, then blocks on a timeout
    /// like a quiet serial port.
    struct Script(Vec<Vec<u8>>);

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() {
                std::thread::sleep(std::time::Duration::from_millis(1));
                return Err(ErrorKind::TimedOut.into());
            }
            let chunk = self.0.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn dispatches_frames_in_order() {
        let mut scripted = stuff(&[1, 2]);
        scripted.extend_from_slice(&stuff(&[3]));
        // split the first frame across chunk boundaries
        let (a, b) = scripted.split_at(3);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let pair = spawn(Script(vec![a.to_vec(), b.to_vec()]), move |payload: Vec<u8>| {
            sink.lock().unwrap().push(payload);
        });

        for _ in 0..200 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        pair.stop();
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn channel_port_feeds_reads() {
        let (mut port, reader) = ChannelPort::spawn(Script(vec![vec![9, 8, 7]]), Vec::<u8>::new());
        let mut got = Vec::new();
        let mut buf = [0u8; 2];
        for _ in 0..200 {
            match port.read(&mut buf) {
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(2))
                }
                Err(e) => panic!("{}", e),
            }
            if got.len() == 3 {
                break;
            }
        }
        reader.stop();
        assert_eq!(got, vec![9, 8, 7]);
    }
}
