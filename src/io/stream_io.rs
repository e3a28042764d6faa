//! `streamRead` / `streamReadAll` / `streamWrite` / `fileGetContents` /
//! `filePutContents` (§4.4).
//!
//! The socket variants are generic over `Read + Write + mio::event::Source`
//! so the same loop drives a [`crate::io::net::DuplexSocket`] or a plain
//! `mio::net::TcpStream`. The file variants never touch the poller — a
//! regular file is always "ready" — but still yield between chunks
//! (§4.4: "cooperative chunked I/O that yields between chunks even though
//! regular files are often immediately ready"), grounded in spirit on
//! `raya-stdlib-posix/src/fs.rs`'s blocking read/write, adapted to suspend
//! at chunk boundaries rather than doing the whole transfer in one go.

use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use mio::event::Source;

use crate::clock::{elapsed_ms, now_ms};
use crate::error::Error;
use crate::io::{wait_for, WaitOutcome};
use crate::suspend::YieldOnce;

const CHUNK: usize = 64 * 1024;

fn remaining_ms(start: u64, timeout_ms: f64) -> Result<f64, Error> {
    if timeout_ms <= 0.0 {
        return Ok(0.0);
    }
    let budget = timeout_ms as u64;
    let spent = elapsed_ms(start);
    if spent >= budget {
        return Err(Error::Timeout);
    }
    Ok((budget - spent) as f64)
}

/// `streamRead(s, max, timeout)` (§4.4): one non-blocking read, registering
/// a read waiter and retrying while the socket isn't yet readable. An empty
/// result means EOF (or a peer close observed while waiting).
pub async fn stream_read<S: Read + Source>(
    stream: &mut S,
    max: usize,
    timeout_ms: f64,
) -> Result<Vec<u8>, Error> {
    let start = now_ms();
    let mut buf = vec![0u8; max.max(1)];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(Vec::new()),
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                let remaining = remaining_ms(start, timeout_ms)?;
                match wait_for(stream, false, remaining).await? {
                    WaitOutcome::Ready => continue,
                    WaitOutcome::Closed => return Ok(Vec::new()),
                    WaitOutcome::TimedOut => return Err(Error::Timeout),
                }
            }
            Err(e) => return Err(Error::from(e)),
        }
    }
}

/// `streamReadAll(s, timeout)` (§4.4): repeat [`stream_read`] until EOF,
/// accumulating every chunk. The deadline is shared across the whole read,
/// not reset per chunk.
pub async fn stream_read_all<S: Read + Source>(
    stream: &mut S,
    timeout_ms: f64,
) -> Result<Vec<u8>, Error> {
    let start = now_ms();
    let mut out = Vec::new();
    loop {
        let remaining = remaining_ms(start, timeout_ms)?;
        let chunk = stream_read(stream, CHUNK, remaining).await?;
        if chunk.is_empty() {
            return Ok(out);
        }
        out.extend_from_slice(&chunk);
    }
}

/// `streamWrite(s, data, timeout)` (§4.4): non-blocking write loop,
/// registering a write waiter while the kernel send buffer is full.
pub async fn stream_write<S: Write + Source>(
    stream: &mut S,
    data: &[u8],
    timeout_ms: f64,
) -> Result<(), Error> {
    let start = now_ms();
    let mut written = 0usize;
    while written < data.len() {
        match stream.write(&data[written..]) {
            Ok(0) => {
                return Err(Error::Io(
                    "streamWrite: write returned 0 bytes".to_string(),
                ))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                let remaining = remaining_ms(start, timeout_ms)?;
                match wait_for(stream, true, remaining).await? {
                    WaitOutcome::Ready => continue,
                    WaitOutcome::Closed => {
                        return Err(Error::Io("streamWrite: peer closed".to_string()))
                    }
                    WaitOutcome::TimedOut => return Err(Error::Timeout),
                }
            }
            Err(e) => return Err(Error::from(e)),
        }
    }
    Ok(())
}

/// `fileGetContents(path)` (§4.4): read a whole file in `CHUNK`-sized
/// pieces, yielding between each so a large file doesn't monopolize the
/// scheduler for the whole transfer.
pub async fn file_get_contents(path: impl AsRef<Path>) -> Result<Vec<u8>, Error> {
    let mut file = std::fs::File::open(path).map_err(Error::from)?;
    let mut out = Vec::new();
    let mut buf = [0u8; CHUNK];
    loop {
        let n = file.read(&mut buf).map_err(Error::from)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
        YieldOnce::new().await;
    }
}

/// `filePutContents(path, data)` (§4.4): write a whole buffer in
/// `CHUNK`-sized pieces, yielding between each.
pub async fn file_put_contents(path: impl AsRef<Path>, data: &[u8]) -> Result<(), Error> {
    let mut file = std::fs::File::create(path).map_err(Error::from)?;
    for chunk in data.chunks(CHUNK) {
        file.write_all(chunk).map_err(Error::from)?;
        YieldOnce::new().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::net::create_socket_pair;
    use crate::scheduler::{Dispatcher, Scheduler};

    #[test]
    fn file_round_trips_through_chunked_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.bin");
        let data = vec![7u8; CHUNK * 2 + 13];
        let data2 = data.clone();

        Scheduler::run_blocking(async move {
            file_put_contents(&path, &data2).await?;
            let read_back = file_get_contents(&path).await?;
            assert_eq!(read_back, data2);
            Ok::<(), Error>(())
        })
        .unwrap();
        let _ = data;
    }

    #[test]
    fn file_get_contents_on_missing_path_is_an_io_error() {
        let result = Scheduler::run_blocking(async {
            file_get_contents("/nonexistent/path/for/corowork-test")
                .await
                .map(|_| ())
        });
        assert!(matches!(result.unwrap_err(), Error::Io(_)));
    }

    #[test]
    fn stream_read_and_write_round_trip_over_a_socket_pair() {
        let scheduler = Scheduler::new(crate::scheduler::SchedulerConfig::default());
        let (mut a, mut b) = create_socket_pair().unwrap();

        let writer = scheduler.spawn(Dispatcher::Default, async move {
            stream_write(&mut a, b"hello from corowork", 2000.0).await?;
            Ok::<(), Error>(())
        });
        let reader = scheduler.spawn(Dispatcher::Default, async move {
            let got = stream_read_all_until_len(&mut b, 20, 2000.0).await?;
            Ok::<Vec<u8>, Error>(got)
        });

        scheduler.thread_wait();
        scheduler.join_blocking(&writer).unwrap();
        let got = scheduler.join_blocking(&reader).unwrap();
        assert_eq!(&**got, b"hello from corowork");
    }

    /// Test-only helper: `stream_read_all` waits for EOF, which a live
    /// socket pair never reaches, so tests instead read until a known
    /// length is reached.
    async fn stream_read_all_until_len<S: Read + Source>(
        stream: &mut S,
        len: usize,
        timeout_ms: f64,
    ) -> Result<Vec<u8>, Error> {
        let start = now_ms();
        let mut out = Vec::new();
        while out.len() < len {
            let remaining = remaining_ms(start, timeout_ms)?;
            let chunk = stream_read(stream, len - out.len(), remaining).await?;
            if chunk.is_empty() {
                return Err(Error::Io("peer closed before len reached".to_string()));
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}
