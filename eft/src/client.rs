//! Blocking CoAP client.
//!
//! [`Client::transceive`] parks the caller on the request's
//! [`ReplySlot`](crate::matcher::ReplySlot) while the same thread drives
//! retransmission and reply matching; the condvar in the slot is what a
//! second thread would wake if one drives the socket instead. Blockwise
//! uploads ([`Client::put_blockwise`]) and EDHOC+OSCORE combined
//! requests ([`Client::send_combined`]) ride on top of the same
//! transceive loop.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use eft_msg::{Code, Id, Message, Payload, Token, TryFromBytes, TryIntoBytes, Type};
use embedded_time::Instant;
use rand::RngCore;

use crate::block::{BlockError, Transfer, TransferState};
use crate::config::Config;
use crate::crypto::{ContextId, Provider};
use crate::edhoc::combined::{build_combined_request, is_first_inner_block, CombinedError};
use crate::matcher::{Matcher, ReplyOutcome, ReplySlot};
use crate::net::{Addrd, Socket};
use crate::oscore::protect::{self, SecurityError};
use crate::time::Clock;
use crate::token::TokenGenerator;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().expect("client mutex poisoned")
}

/// Ways a client operation can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError<E> {
  /// The socket refused our bytes
  Socket(E),
  /// Retransmissions were exhausted without a reply
  Timeout,
  /// The peer rejected the message with RST
  Reset,
  /// The peer broke the blockwise contract
  Block(BlockError),
  /// A blockwise block was not acknowledged with 2.31 / 2.01
  UnexpectedBlockAck(Code),
  /// Building a combined request failed
  Combined(CombinedError),
  /// Protecting or unprotecting a message failed
  Security(SecurityError),
  /// The message would not serialize
  Serialize,
}

/// A blocking CoAP client over one socket.
#[derive(Debug)]
pub struct Client<C, S, P, R>
  where C: Clock,
        S: Socket,
        P: Provider,
        R: RngCore
{
  config: Config,
  clock: C,
  socket: S,
  next_mid: AtomicU16,
  tokens: Mutex<TokenGenerator>,
  matcher: Mutex<Matcher<C>>,
  provider: Mutex<P>,
  rng: Mutex<R>,
}

impl<C, S, P, R> Client<C, S, P, R>
  where C: Clock,
        S: Socket,
        P: Provider,
        R: RngCore
{
  /// Create a client.
  pub fn new(config: Config, clock: C, socket: S, provider: P, mut rng: R) -> Self {
    let tokens = TokenGenerator::new(&mut rng);

    Self { config,
           clock,
           socket,
           next_mid: AtomicU16::new(1),
           tokens: Mutex::new(tokens),
           matcher: Mutex::new(Matcher::new()),
           provider: Mutex::new(provider),
           rng: Mutex::new(rng) }
  }

  fn now(&self) -> Instant<C> {
    self.clock.try_now().expect("monotonic clock read failed")
  }

  /// Rotate the token space: new random prefix, sequence restarted.
  pub fn rekey(&self) {
    let mut rng = lock(&self.rng);
    lock(&self.tokens).rekey(&mut *rng);
  }

  fn put_on_wire(&self, req: &Addrd<Message>) -> Result<(), ClientError<S::Error>> {
    let bytes: Vec<u8> = req.data()
                            .clone()
                            .try_into_bytes()
                            .map_err(|_| ClientError::Serialize)?;

    nb::block!(self.socket.send(Addrd(bytes.as_slice(), req.addr()))).map_err(ClientError::Socket)
  }

  /// Provision identity (token, MID) and put a request on the wire,
  /// yielding the slot its reply will land in and the token that names
  /// the exchange.
  pub fn send(&self,
              mut req: Addrd<Message>)
              -> Result<(Arc<ReplySlot>, Token), ClientError<S::Error>> {
    if req.data().token.0.is_empty() {
      req.data_mut().token = lock(&self.tokens).next_token();
    }

    if req.data().id == Id(0) {
      req.data_mut().id = Id(self.next_mid.fetch_add(1, Ordering::Relaxed));
    }

    let token = req.data().token;
    let slot = lock(&self.matcher).register(req.clone(), self.now(), self.config.transmission);

    self.put_on_wire(&req)?;

    Ok((slot, token))
  }

  /// Drain the socket and drive retransmission timers once.
  pub fn poll_once(&self) -> Result<(), ClientError<S::Error>> {
    let mut buffer = vec![0u8; self.config.server.message_size];

    loop {
      match self.socket.recv(&mut buffer) {
        | Ok(recvd) => {
          let n = *recvd.data();
          if let Ok(msg) = <Message as TryFromBytes<&[u8]>>::try_from_bytes(&buffer[..n]) {
            if let Some(stray) = lock(&self.matcher).accept(Addrd(msg, recvd.addr())) {
              log::debug!("ignoring stray message from {}", stray.addr());
            }
          }
        },
        | Err(nb::Error::WouldBlock) => break,
        | Err(nb::Error::Other(e)) => return Err(ClientError::Socket(e)),
      }
    }

    for resend in lock(&self.matcher).poll(self.now()) {
      self.put_on_wire(&resend)?;
    }

    Ok(())
  }

  /// Block until a slot resolves, driving the loop from this thread.
  pub fn wait(&self, slot: &ReplySlot) -> Result<Addrd<Message>, ClientError<S::Error>> {
    loop {
      if let Some(outcome) = slot.try_take() {
        return match outcome {
          | ReplyOutcome::Response(resp) => Ok(resp),
          | ReplyOutcome::Reset => Err(ClientError::Reset),
          | ReplyOutcome::Timeout => Err(ClientError::Timeout),
        };
      }

      self.poll_once()?;
      std::thread::sleep(std::time::Duration::from_millis(1));
    }
  }

  /// Send a request and block for its reply.
  pub fn transceive(&self, req: Addrd<Message>) -> Result<Addrd<Message>, ClientError<S::Error>> {
    let (slot, _token) = self.send(req)?;
    self.wait(&slot)
  }

  /// Upload `body` with a Block1 series of `1 << (szx + 4)`-byte
  /// blocks, returning the final response.
  ///
  /// Every block carries the same fresh Request-Tag so the operation
  /// cannot be confused with a concurrent upload to the same resource
  /// (RFC 9175 section 3.3). Intermediate blocks must be acknowledged
  /// with 2.31 Continue echoing our block descriptor.
  pub fn put_blockwise(&self,
                       template: Addrd<Message>,
                       body: &[u8],
                       szx: u8)
                       -> Result<Addrd<Message>, ClientError<S::Error>> {
    let mut transfer = Transfer::new(szx, body.len());
    let tag = lock(&self.tokens).next_request_tag();

    loop {
      let Some(block) = transfer.next_block() else {
        return Err(ClientError::Block(BlockError::OutOfOrder { expected: 0,
                                                               got: 0 }));
      };
      let chunk = transfer.next_payload(body);

      let mut req = template.clone();
      req.data_mut().token = Token(Default::default());
      req.data_mut().id = Id(0);
      req.data_mut().set_block1(block).ok();
      req.data_mut().add_request_tag(&tag).ok();
      req.data_mut().payload = Payload(chunk.to_vec());

      transfer.started();
      let resp = self.transceive(req)?;

      if block.more() {
        if resp.data().code != Code::CONTINUE {
          return Err(ClientError::UnexpectedBlockAck(resp.data().code));
        }

        let echoed = resp.data()
                         .block1()
                         .ok_or(ClientError::UnexpectedBlockAck(resp.data().code))?;

        transfer.advance(echoed, chunk.len()).map_err(ClientError::Block)?;
      } else {
        transfer.advance(block, chunk.len()).map_err(ClientError::Block)?;
        debug_assert_eq!(transfer.state(), TransferState::Completed);
        return Ok(resp);
      }
    }
  }

  /// Protect `request` under `ctx`, append EDHOC message_3, and send
  /// the result as an EDHOC+OSCORE combined request (RFC 9668
  /// section 3.2.1). The response is unprotected with the same context.
  pub fn send_combined(&self,
                       ctx: ContextId,
                       request: &Message,
                       edhoc_msg3: &[u8],
                       peer: std::net::SocketAddr)
                       -> Result<Addrd<Message>, ClientError<S::Error>> {
    // the EDHOC option may only accompany the first inner block
    if !is_first_inner_block(request) {
      return Err(ClientError::Combined(CombinedError::MissingCiphertext));
    }

    let protected =
      protect::protect_request(&mut *lock(&self.provider), ctx, request).map_err(ClientError::Security)?;

    let combined =
      build_combined_request(&protected,
                             edhoc_msg3,
                             self.config.security.max_unfragmented_size).map_err(ClientError::Combined)?;

    let resp = self.transceive(Addrd(combined, peer))?;

    if resp.data().oscore().is_some() {
      let inner = protect::unprotect_response(&mut *lock(&self.provider), ctx, resp.data())
                    .map_err(ClientError::Security)?;
      return Ok(Addrd(inner, resp.addr()));
    }

    Ok(resp)
  }

  /// Forget an outstanding exchange (e.g. a cancelled observation).
  pub fn forget(&self, peer: std::net::SocketAddr, token: Token) {
    lock(&self.matcher).forget(peer, token);
  }

  /// A fresh request shell aimed at `peer`.
  pub fn request(&self, ty: Type, code: Code, peer: std::net::SocketAddr) -> Addrd<Message> {
    Addrd(Message::new(ty, code, Id(0), Token(Default::default())), peer)
  }
}

#[cfg(test)]
mod tests {
  use eft_msg::Block;

  use super::*;
  use crate::test::{dummy_addr, ClockMock, MockProvider, TestSocket};

  type TestClient = Client<ClockMock, TestSocket, MockProvider, rand::rngs::mock::StepRng>;

  fn client() -> (TestClient, TestSocket, ClockMock) {
    let socket = TestSocket::new();
    let clock = ClockMock::new();
    (Client::new(Config::default(),
                 clock.clone(),
                 socket.clone(),
                 MockProvider::new(),
                 rand::rngs::mock::StepRng::new(0xFEED_F00D, 1)),
     socket,
     clock)
  }

  fn parse(dgram: &Addrd<Vec<u8>>) -> Addrd<Message> {
    Addrd(<Message as TryFromBytes<&[u8]>>::try_from_bytes(dgram.data().as_slice()).unwrap(),
          dgram.addr())
  }

  #[test]
  fn send_provisions_token_and_mid() {
    let (client, socket, _) = client();

    let req = client.request(Type::Con, Code::GET, dummy_addr());
    let (_slot, token) = client.send(req).unwrap();

    let sent = parse(&socket.pop_outbound().unwrap());
    assert_eq!(sent.data().token, token);
    assert_eq!(token.as_bytes().len(), 8);
    assert_ne!(sent.data().id, Id(0));
  }

  #[test]
  fn transceive_resolves_on_matching_token() {
    let (client, socket, _) = client();

    let req = client.request(Type::Con, Code::GET, dummy_addr());
    let (slot, token) = client.send(req).unwrap();

    let mut resp = Message::new(Type::Ack, Code::CONTENT, Id(99), token);
    resp.payload = Payload(b"hi".to_vec());
    socket.push_inbound(Addrd(resp.clone().try_into_bytes().unwrap(), dummy_addr()));

    client.poll_once().unwrap();
    let got = client.wait(&slot).unwrap();
    assert_eq!(got.data().payload.0, b"hi");
  }

  #[test]
  fn exhausted_retransmissions_surface_as_timeout() {
    let (client, socket, clock) = client();

    let req = client.request(Type::Con, Code::GET, dummy_addr());
    let (slot, _token) = client.send(req).unwrap();
    assert!(socket.pop_outbound().is_some());

    // burn through every retransmission
    for _ in 0..=Config::default().transmission.max_retransmit {
      clock.advance(1_000_000);
      client.poll_once().unwrap();
    }

    assert_eq!(client.wait(&slot).unwrap_err(), ClientError::Timeout);

    // the retransmissions actually hit the wire
    let mut resent = 0;
    while socket.pop_outbound().is_some() {
      resent += 1;
    }
    assert_eq!(resent, Config::default().transmission.max_retransmit as usize);
  }

  /// 150 bytes in 32-byte blocks: five requests, the last with M=0,
  /// every intermediate acknowledged by 2.31 mirroring the block.
  #[test]
  fn blockwise_put_upload() {
    let (client, socket, _) = client();

    let responder = {
      let socket = socket.clone();
      move || {
        let sent = parse(&socket.pop_outbound().unwrap());
        let block = sent.data().block1().unwrap();

        let code = if block.more() { Code::CONTINUE } else { Code::CHANGED };
        let mut resp = Message::new(Type::Ack, code, sent.data().id, sent.data().token);
        if block.more() {
          resp.set_block1(block).unwrap();
        }
        socket.push_inbound(Addrd(resp.try_into_bytes().unwrap(), dummy_addr()));

        sent
      }
    };

    let body = vec![0x5Au8; 150];
    let template = {
      let mut t = client.request(Type::Con, Code::PUT, dummy_addr());
      t.data_mut().set_path("store").unwrap();
      t
    };

    // drive the upload on a worker so this thread can play server
    let handle = std::thread::spawn({
      let body = body.clone();
      move || client.put_blockwise(template, &body, 1)
    });

    let mut seen = Vec::new();
    let mut tags = std::collections::BTreeSet::new();
    for i in 0..5 {
      // wait for the next outgoing block
      let sent = loop {
        if let Some(_peek) = { socket.outbox.lock().unwrap().front().cloned() } {
          break responder();
        }
        std::thread::yield_now();
      };

      let block = sent.data().block1().unwrap();
      assert_eq!(block.num(), i);
      assert_eq!(block.size(), 32);
      assert_eq!(block.more(), i < 4);
      assert_eq!(block.offset(), 32 * i as usize);

      tags.insert(sent.data().request_tags().unwrap()[0].0.clone());
      seen.extend(sent.data().payload.0.clone());
    }

    let resp = handle.join().unwrap().unwrap();
    assert_eq!(resp.data().code, Code::CHANGED);
    assert_eq!(seen, body);
    assert_eq!(tags.len(), 1, "request-tag must not change mid-operation");
  }

  #[test]
  fn combined_request_layout_and_response_unprotection() {
    let (client, socket, _) = client();

    let mut inner = Message::new(Type::Con, Code::GET, Id(0), Token(Default::default()));
    inner.set_path("sensors/temp").unwrap();

    let responder = {
      let socket = socket.clone();
      std::thread::spawn(move || loop {
        if let Some(dgram) = socket.pop_outbound() {
          let sent = parse(&dgram);

          // outer message: EDHOC option present, OSCORE option from
          // protect_request, payload = bstr(msg3) || ciphertext
          assert!(sent.data().has_edhoc());
          assert!(sent.data().oscore().is_some());
          assert_eq!(sent.data().payload.0[..5], [0x44, 0xDE, 0xAD, 0xBE, 0xEF]);

          // reply with a "protected" response (identity mock crypto):
          // plaintext is code 2.05 + payload marker + body
          let mut resp = Message::new(Type::Ack, Code::CHANGED, sent.data().id, sent.data().token);
          resp.set_oscore(&[0x09, 0x01, 0x42]).unwrap();
          resp.payload = Payload([&[0x45u8, 0xFF] as &[u8], b"21C"].concat());
          socket.push_inbound(Addrd(resp.try_into_bytes().unwrap(), dummy_addr()));
          break;
        }
        std::thread::yield_now();
      })
    };

    let resp = client.send_combined(crate::crypto::ContextId(0),
                                    &inner,
                                    &[0x44, 0xDE, 0xAD, 0xBE, 0xEF],
                                    dummy_addr())
                     .unwrap();

    responder.join().unwrap();
    assert_eq!(resp.data().code, Code::CONTENT);
    assert_eq!(resp.data().payload.0, b"21C");
  }

  #[test]
  fn combined_request_enforces_first_inner_block() {
    let (client, _socket, _) = client();

    let mut inner = Message::new(Type::Con, Code::PUT, Id(0), Token(Default::default()));
    inner.set_block1(Block::new(0, 3, true).unwrap()).unwrap();

    assert!(matches!(client.send_combined(crate::crypto::ContextId(0),
                                          &inner,
                                          &[0x41, 0xAA],
                                          dummy_addr()),
                     Err(ClientError::Combined(_))));
  }
}
