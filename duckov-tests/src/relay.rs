//! UDP relay with fault injection

use duckov_protocol::{Command, MessageType, Segment};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Transparent proxy between one client and `upstream`.
///
/// Client datagrams pass through a transform; returning `None` drops them.
/// Server datagrams are forwarded unchanged.
pub struct LossyRelay {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    altered: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl LossyRelay {
    pub fn start<F>(upstream: SocketAddr, mut client_to_server: F) -> io::Result<Self>
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_read_timeout(Some(Duration::from_millis(20)))?;
        let addr = socket.local_addr()?;

        let running = Arc::new(AtomicBool::new(true));
        let altered = Arc::new(AtomicUsize::new(0));

        let flag = running.clone();
        let counter = altered.clone();
        let handle = thread::Builder::new()
            .name("lossy-relay".into())
            .spawn(move || {
                let mut client: Option<SocketAddr> = None;
                let mut buf = vec![0u8; 64 * 1024];

                while flag.load(Ordering::Acquire) {
                    let (n, from) = match socket.recv_from(&mut buf) {
                        Ok(received) => received,
                        Err(_) => continue,
                    };
                    let datagram = &buf[..n];

                    if from == upstream {
                        if let Some(client) = client {
                            let _ = socket.send_to(datagram, client);
                        }
                        continue;
                    }

                    client = Some(from);
                    match client_to_server(datagram) {
                        Some(forward) => {
                            if forward.as_slice() != datagram {
                                counter.fetch_add(1, Ordering::Relaxed);
                            }
                            if !forward.is_empty() {
                                let _ = socket.send_to(&forward, upstream);
                            }
                        }
                        None => {
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })?;

        Ok(LossyRelay {
            addr,
            running,
            altered,
            handle: Some(handle),
        })
    }

    /// Address clients should connect to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Datagrams dropped or rewritten so far
    pub fn altered(&self) -> usize {
        self.altered.load(Ordering::Relaxed)
    }
}

impl Drop for LossyRelay {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Transform that removes the PUSH segment `sn` from the first reliable
/// datagram carrying it and forwards everything else untouched.
pub fn strip_push_once(sn: u32) -> impl FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static {
    let mut done = false;
    move |datagram: &[u8]| {
        if done || datagram.first() != Some(&(MessageType::Reliable as u8)) {
            return Some(datagram.to_vec());
        }

        let segments: Vec<Segment> = match Segment::iter_datagram(&datagram[1..]).collect() {
            Ok(segments) => segments,
            Err(_) => return Some(datagram.to_vec()),
        };
        let target = |s: &Segment| s.cmd == Command::Push && s.sn.as_raw() == sn;
        if !segments.iter().any(target) {
            return Some(datagram.to_vec());
        }
        done = true;

        let kept: Vec<&Segment> = segments.iter().filter(|s| !target(s)).collect();
        if kept.is_empty() {
            return None;
        }

        let mut out = bytes::BytesMut::new();
        out.extend_from_slice(&[MessageType::Reliable as u8]);
        for segment in kept {
            segment.encode(&mut out);
        }
        Some(out.to_vec())
    }
}
