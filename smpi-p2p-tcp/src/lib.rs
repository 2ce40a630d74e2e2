//! Network provider implementation.
//!
//! Every pair of processes shares one TCP connection. The lower rank listens
//! and the higher rank connects; the connecting side introduces itself with a
//! `Hello`. Each packet on the wire is a `bincode` encoded `Header` followed
//! by the raw payload bytes. A reader thread per peer feeds the mailbox.
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use smpi_base::{Error, Header, Mailbox, Packet, Provider, Rank, Result};

/// How long to wait for the whole group to connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// First message on every connection.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
struct Hello {
    /// Rank of the connecting process.
    rank: Rank,

    /// Group size the connecting process was started with.
    size: u64,
}

pub struct TcpP2P {
    /// Rank of this process
    id: Rank,

    /// Incoming packets from every peer
    mailbox: Arc<Mailbox>,

    /// Write halves of the peer connections (`None` for this process)
    links: Vec<Option<Mutex<TcpStream>>>,

    /// Set once this process has shut down
    closed: bool,
}

impl TcpP2P {
    /// Bind to this rank's address and connect to the rest of the group.
    pub fn connect(rank: Rank, peers: &[String]) -> Result<TcpP2P> {
        let addr = usize::try_from(rank)
            .ok()
            .and_then(|i| peers.get(i))
            .ok_or(Error::InvalidRank(rank))?;
        let listener = TcpListener::bind(addr)?;
        TcpP2P::with_listener(rank, listener, peers, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Connect to the rest of the group using an already bound listener.
    pub fn with_listener(
        rank: Rank,
        listener: TcpListener,
        peers: &[String],
        timeout: Duration,
    ) -> Result<TcpP2P> {
        let size = peers.len();
        if rank < 0 || rank as usize >= size {
            return Err(Error::InvalidRank(rank));
        }
        let deadline = Instant::now() + timeout;
        let mut streams: Vec<Option<TcpStream>> = (0..size).map(|_| None).collect();

        // Connect to every lower rank and introduce ourselves.
        for (peer, addr) in peers.iter().enumerate().take(rank as usize) {
            let mut stream = stream_connect(addr, deadline)?;
            bincode::serialize_into(&mut stream, &Hello { rank, size: size as u64 })?;
            stream.flush()?;
            debug!("rank {rank} connected to rank {peer} at {addr}");
            streams[peer] = Some(stream);
        }

        // Accept one connection from every higher rank.
        listener.set_nonblocking(true)?;
        let mut remaining = size - rank as usize - 1;
        while remaining > 0 {
            match listener.accept() {
                Ok((mut stream, remote)) => {
                    stream.set_nonblocking(false)?;
                    let hello: Hello = bincode::deserialize_from(&mut stream)?;
                    if hello.size != size as u64 {
                        return Err(Error::Config(format!(
                            "rank {} was started with {} processes, expected {size}",
                            hello.rank, hello.size
                        )));
                    }
                    let slot = usize::try_from(hello.rank)
                        .ok()
                        .filter(|&i| i > rank as usize && i < size)
                        .ok_or(Error::InvalidRank(hello.rank))?;
                    if streams[slot].is_some() {
                        return Err(Error::Config(format!("rank {} connected twice", hello.rank)));
                    }
                    debug!("rank {rank} accepted rank {} from {remote}", hello.rank);
                    streams[slot] = Some(stream);
                    remaining -= 1;
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("{remaining} peers never connected"),
                        )));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let mailbox = Arc::new(Mailbox::new(size));
        let mut links = Vec::with_capacity(size);
        for (peer, stream) in streams.into_iter().enumerate() {
            match stream {
                Some(stream) => {
                    stream.set_nodelay(true)?;
                    let reader = stream.try_clone()?;
                    let mailbox = Arc::clone(&mailbox);
                    thread::Builder::new()
                        .name(format!("smpi-tcp-{rank}-{peer}"))
                        .spawn(move || read_loop(peer as Rank, reader, mailbox))?;
                    links.push(Some(Mutex::new(stream)));
                }
                None => links.push(None),
            }
        }
        info!("rank {rank} connected to {} peers", size - 1);
        Ok(TcpP2P {
            id: rank,
            mailbox,
            links,
            closed: false,
        })
    }
}

/// Attempt to connect to the stream until the deadline passes.
fn stream_connect(addr: &str, deadline: Instant) -> Result<TcpStream> {
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(err) if Instant::now() >= deadline => return Err(err.into()),
            Err(_) => thread::sleep(POLL_INTERVAL),
        }
    }
}

/// Read packets from one peer until it closes its link.
fn read_loop(peer: Rank, stream: TcpStream, mailbox: Arc<Mailbox>) {
    let mut reader = BufReader::new(stream);
    loop {
        match read_packet(&mut reader) {
            Ok(Some(packet)) => mailbox.push(packet),
            Ok(None) => {
                debug!("peer {peer} closed its link");
                break;
            }
            Err(err) => {
                error!("link to peer {peer} failed: {err}");
                break;
            }
        }
    }
    mailbox.close(peer);
}

/// Read one framed packet, or `None` on a clean end of stream.
fn read_packet<R: Read>(reader: &mut R) -> Result<Option<Packet>> {
    let header: Header = match bincode::deserialize_from(&mut *reader) {
        Ok(header) => header,
        Err(err) => match *err {
            bincode::ErrorKind::Io(ref io) if io.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            _ => return Err(err.into()),
        },
    };
    let len = usize::try_from(header.len)
        .map_err(|_| Error::Wire(format!("payload of {} bytes", header.len)))?;
    let mut payload = vec![0; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(Packet { header, payload }))
}

/// Write one framed packet.
fn write_packet<W: Write>(writer: &mut W, packet: &Packet) -> Result<()> {
    let mut frame = bincode::serialize(&packet.header)?;
    frame.extend_from_slice(&packet.payload);
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

impl Provider for TcpP2P {
    fn rank(&self) -> Rank {
        self.id
    }

    fn size(&self) -> usize {
        self.links.len()
    }

    fn send(&self, dest: Rank, packet: Packet) -> Result<()> {
        if self.closed {
            return Err(Error::Disconnected(self.id));
        }
        if dest == self.id {
            self.mailbox.push(packet);
            return Ok(());
        }
        let link = usize::try_from(dest)
            .ok()
            .and_then(|i| self.links.get(i))
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidRank(dest))?;
        let mut stream = link.lock().unwrap_or_else(PoisonError::into_inner);
        write_packet(&mut *stream, &packet).map_err(|err| {
            error!("send to rank {dest} failed: {err}");
            Error::Disconnected(dest)
        })
    }

    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        debug!("tcp provider {} shutting down", self.id);
        self.closed = true;
        for link in self.links.iter().flatten() {
            let stream = link.lock().unwrap_or_else(PoisonError::into_inner);
            // The peer may already be gone; nothing is left to flush then.
            let _ = stream.shutdown(Shutdown::Write);
        }
        Ok(())
    }
}

impl Drop for TcpP2P {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_group(size: usize) -> Vec<TcpP2P> {
        let listeners: Vec<TcpListener> = (0..size)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let peers: Vec<String> = listeners
            .iter()
            .map(|l| l.local_addr().unwrap().to_string())
            .collect();
        let handles: Vec<_> = listeners
            .into_iter()
            .enumerate()
            .map(|(rank, listener)| {
                let peers = peers.clone();
                thread::spawn(move || {
                    TcpP2P::with_listener(rank as Rank, listener, &peers, Duration::from_secs(10))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    fn collect(mailbox: &Mailbox, count: usize) -> Vec<Packet> {
        let mut out = vec![];
        while out.len() < count {
            let (packets, snapshot) = mailbox.drain();
            if packets.is_empty() {
                mailbox.wait_change(snapshot.epoch);
            }
            out.extend(packets);
        }
        out
    }

    #[test]
    fn frame_round_trip_through_a_buffer() {
        let packet = Packet::new(3, 1, 9, vec![5, 6, 7]);
        let mut wire = vec![];
        write_packet(&mut wire, &packet).unwrap();
        let mut reader = &wire[..];
        let decoded = read_packet(&mut reader).unwrap().unwrap();
        assert_eq!(decoded.header, packet.header);
        assert_eq!(decoded.payload, packet.payload);
        assert!(read_packet(&mut reader).unwrap().is_none());
    }

    #[test]
    fn loopback_group_exchanges_packets() {
        let mut group = loopback_group(3);
        group[2].send(0, Packet::new(0, 2, 1, vec![42; 1000])).unwrap();
        group[0].send(1, Packet::new(0, 0, 1, vec![7])).unwrap();
        group[1].send(1, Packet::new(0, 1, 1, vec![8])).unwrap();

        let packets = collect(group[0].mailbox(), 1);
        assert_eq!(packets[0].header.source, 2);
        assert_eq!(packets[0].payload, vec![42; 1000]);

        let mut payloads: Vec<u8> = collect(group[1].mailbox(), 2)
            .iter()
            .map(|p| p.payload[0])
            .collect();
        payloads.sort();
        assert_eq!(payloads, vec![7, 8]);

        group[2].shutdown().unwrap();
        loop {
            let (_, snapshot) = group[0].mailbox().drain();
            if snapshot.is_closed(2) {
                break;
            }
            group[0].mailbox().wait_change(snapshot.epoch);
        }
    }
}
