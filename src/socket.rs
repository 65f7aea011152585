use std::fs::File;
use std::io::{Read, Write};

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

use crate::Error;

pub(crate) const STATUS_FAIL: u8 = 0x0;
pub(crate) const STATUS_OK: u8 = 0x1;
pub(crate) const PROCEED: u8 = 0x0;

/// Connected sequenced-packet pair, the sole parent/child IPC channel.
///
/// Every message is exactly one octet sent as one datagram; an empty
/// datagram or a closed peer is a protocol violation.
pub(crate) struct SetupSocket;

impl SetupSocket {
    pub fn create() -> Result<(ParentEnd, ChildEnd), Error> {
        let (parent, child) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )?;
        Ok((ParentEnd(File::from(parent)), ChildEnd(File::from(child))))
    }
}

pub(crate) struct ParentEnd(File);

impl ParentEnd {
    /// Reads one status token, mapping a closed or broken socket to failure.
    pub fn recv_status(&mut self) -> u8 {
        match recv_token(&mut self.0) {
            Ok(token) => token,
            Err(err) => {
                log::debug!("Container closed the setup socket: {err}");
                STATUS_FAIL
            }
        }
    }

    pub fn send(&mut self, token: u8) -> Result<(), Error> {
        send_token(&mut self.0, token)
    }
}

pub(crate) struct ChildEnd(File);

impl ChildEnd {
    pub fn send(&mut self, token: u8) -> Result<(), Error> {
        send_token(&mut self.0, token)
    }

    pub fn recv(&mut self) -> Result<u8, Error> {
        recv_token(&mut self.0)
    }
}

fn send_token(tx: &mut File, token: u8) -> Result<(), Error> {
    Ok(tx.write_all(&[token])?)
}

fn recv_token(rx: &mut File) -> Result<u8, Error> {
    let mut buf = [0; 1];
    rx.read_exact(&mut buf)?;
    Ok(buf[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_cross_the_pair() {
        let (mut parent, mut child) = SetupSocket::create().unwrap();
        child.send(STATUS_OK).unwrap();
        assert_eq!(parent.recv_status(), STATUS_OK);
        parent.send(PROCEED).unwrap();
        assert_eq!(child.recv().unwrap(), PROCEED);
    }

    #[test]
    fn closed_peer_reads_as_failure() {
        let (mut parent, child) = SetupSocket::create().unwrap();
        drop(child);
        assert_eq!(parent.recv_status(), STATUS_FAIL);
    }
}
