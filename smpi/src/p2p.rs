//! Point to point messaging.
use std::rc::Rc;
use log::trace;
use smpi_base::{as_bytes, as_bytes_mut, Element, Packet, Rank, Result, Tag};
use crate::communicator::{check_element, contiguous, Communicator};
use crate::datatype::Datatype;
use crate::request::{Request, Status};

impl Communicator {
    /// Send `data` to `dest` (blocking).
    ///
    /// Sends are eager: the call returns as soon as the payload has been
    /// handed to the transport, so `data` can be reused right away.
    pub fn send<T: Element>(&self, data: &[T], dest: Rank, tag: Tag) -> Result<()> {
        self.send_with(data, &contiguous::<T>(data.len())?, dest, tag)
    }

    /// Send the elements of `data` enumerated by `datatype` (blocking).
    pub fn send_with<T: Element>(&self, data: &[T], datatype: &Datatype, dest: Rank, tag: Tag) -> Result<()> {
        check_element::<T>(datatype)?;
        let payload = datatype.pack(as_bytes(data))?;
        trace!("rank {} send {} bytes to {} (tag {})", self.rank(), payload.len(), dest, tag);
        self.send_bytes(self.p2p_context(), dest, tag, payload)
    }

    /// Receive into `data` from `source` (blocking).
    ///
    /// `source` and `tag` may be `ANY_SOURCE` and `ANY_TAG`. A message
    /// shorter than `data` fills a prefix; a longer one fails with
    /// `Truncated`.
    pub fn recv<T: Element>(&self, data: &mut [T], source: Rank, tag: Tag) -> Result<Status> {
        self.recv_with(data, &contiguous::<T>(data.len())?, source, tag)
    }

    /// Receive into the elements of `data` enumerated by `datatype`
    /// (blocking). Elements the descriptor does not enumerate are untouched.
    pub fn recv_with<T: Element>(&self, data: &mut [T], datatype: &Datatype, source: Rank, tag: Tag) -> Result<Status> {
        check_element::<T>(datatype)?;
        let packet = self.recv_packet(self.p2p_context(), source, tag)?;
        unpack(&packet, datatype, as_bytes_mut(data))
    }

    /// Non-blocking send. The request keeps `data` borrowed.
    pub fn isend<'a, T: Element>(&self, data: &'a [T], dest: Rank, tag: Tag) -> Result<Request<'a>> {
        self.isend_with(data, &contiguous::<T>(data.len())?, dest, tag)
    }

    /// Non-blocking send laid out by `datatype`.
    pub fn isend_with<'a, T: Element>(
        &self,
        data: &'a [T],
        datatype: &Datatype,
        dest: Rank,
        tag: Tag,
    ) -> Result<Request<'a>> {
        check_element::<T>(datatype)?;
        let world = self.check_dest(dest, tag)?;
        let payload = datatype.pack(as_bytes(data))?;
        let packet = Packet::new(self.p2p_context(), self.rank(), tag, payload);
        let id = self
            .handle
            .borrow_mut()
            .post_send(world, packet, datatype.count())?;
        Ok(Request::send(Rc::clone(&self.handle), id))
    }

    /// Non-blocking receive. `data` must not be read until the request
    /// completes; the borrow checker enforces this.
    pub fn irecv<'a, T: Element>(&self, data: &'a mut [T], source: Rank, tag: Tag) -> Result<Request<'a>> {
        let datatype = contiguous::<T>(data.len())?;
        self.irecv_with(data, &datatype, source, tag)
    }

    /// Non-blocking receive laid out by `datatype`.
    pub fn irecv_with<'a, T: Element>(
        &self,
        data: &'a mut [T],
        datatype: &Datatype,
        source: Rank,
        tag: Tag,
    ) -> Result<Request<'a>> {
        check_element::<T>(datatype)?;
        let buffer = as_bytes_mut(data);
        // Fail on a bad descriptor now rather than at completion
        datatype.unpack(&[], buffer)?;
        let matcher = self.matcher(self.p2p_context(), source, tag)?;
        let id = self.handle.borrow_mut().post_recv(matcher);
        Ok(Request::recv(Rc::clone(&self.handle), id, buffer, datatype.detach()))
    }

    /// Block until a matching message is available and describe it, without
    /// receiving it. The count is in elements of `T`.
    pub fn probe<T: Element>(&self, source: Rank, tag: Tag) -> Result<Status> {
        let matcher = self.matcher(self.p2p_context(), source, tag)?;
        let header = self.handle.borrow_mut().wait_peek(&matcher)?;
        Ok(Status {
            source: header.source,
            tag: header.tag,
            count: header.len as usize / T::size(),
        })
    }

    /// Like `probe`, but returns `None` instead of blocking.
    pub fn iprobe<T: Element>(&self, source: Rank, tag: Tag) -> Result<Option<Status>> {
        let matcher = self.matcher(self.p2p_context(), source, tag)?;
        let header = self.handle.borrow_mut().peek(&matcher);
        Ok(header.map(|header| Status {
            source: header.source,
            tag: header.tag,
            count: header.len as usize / T::size(),
        }))
    }

    /// Send `send` to `dest` and receive into `recv` from `source`.
    pub fn sendrecv<T: Element>(
        &self,
        send: &[T],
        dest: Rank,
        send_tag: Tag,
        recv: &mut [T],
        source: Rank,
        recv_tag: Tag,
    ) -> Result<Status> {
        self.send(send, dest, send_tag)?;
        self.recv(recv, source, recv_tag)
    }
}

fn unpack(packet: &Packet, datatype: &Datatype, buffer: &mut [u8]) -> Result<Status> {
    let count = datatype.unpack(&packet.payload, buffer)?;
    Ok(Status {
        source: packet.header.source,
        tag: packet.header.tag,
        count,
    })
}
