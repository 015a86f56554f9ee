//! The server service: one event loop's worth of CoAP processing.
//!
//! An inbound datagram walks, in order: parse → critical-option and
//! block-family validation → outer Block1 reassembly (combined
//! requests) → the EDHOC+OSCORE split → OSCORE unprotect → Echo gate →
//! routing → handler → OSCORE protect → out. Each process-wide table
//! sits behind its own mutex, and none of them is held across a
//! transport write: [`Service::handle_datagram`] returns the bytes to
//! send instead of sending them.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard};

use eft_msg::known::no_repeat::{BLOCK1, EDHOC, OBSERVE};
use eft_msg::{observe::Action, registry, Code, CodeKind, Id, Message, OptionMustBeProcessed,
              OscoreOption, Payload, Token, TryFromBytes, TryIntoBytes, Type};
use embedded_time::Instant;
use rand::RngCore;

use crate::block;
use crate::config::Config;
use crate::crypto::{ContextId, DriverError, EdhocDriver, Provider};
use crate::echo::{EchoCache, Gate};
use crate::edhoc::combined::split_comb_payload;
use crate::edhoc::outer_block::{OuterBlockCache, OuterBlockOutcome};
use crate::edhoc::session::SessionTable;
use crate::edhoc::transport::{complete_message_3, handle_well_known_edhoc};
use crate::error::{response_for, Error};
use crate::hop_limit::{self, HopLimit};
use crate::net::{Addrd, Socket};
use crate::observe::{Observer, ObserverRegistry};
use crate::oscore::exchange::ExchangeTable;
use crate::oscore::protect;
use crate::time::Clock;

/// Response framing helpers
pub mod respond;

/// Uri-Path routing & discovery
pub mod router;

pub use router::{Handler, Router};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().expect("table mutex poisoned")
}

/// A CoAP service instance: config, collaborators and the process-wide
/// tables, each behind its own mutex.
pub struct Service<C, P, D, R>
  where C: Clock,
        P: Provider,
        D: EdhocDriver,
        R: RngCore
{
  config: Config,
  clock: C,
  next_mid: AtomicU16,
  router: Mutex<Router>,
  echo: Mutex<EchoCache<C>>,
  exchanges: Mutex<ExchangeTable<C>>,
  sessions: Mutex<SessionTable<C>>,
  outer_blocks: Mutex<OuterBlockCache<C>>,
  observers: Mutex<ObserverRegistry>,
  provider: Mutex<P>,
  driver: Mutex<D>,
  rng: Mutex<R>,
}

impl<C, P, D, R> core::fmt::Debug for Service<C, P, D, R>
  where C: Clock,
        P: Provider,
        D: EdhocDriver,
        R: RngCore
{
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Service").field("config", &self.config).finish()
  }
}

impl<C, P, D, R> Service<C, P, D, R>
  where C: Clock,
        P: Provider,
        D: EdhocDriver,
        R: RngCore
{
  /// Assemble a service from its parts. The router is complete at this
  /// point; no resources are added later.
  pub fn new(config: Config, clock: C, router: Router, provider: P, driver: D, rng: R) -> Self {
    Self { next_mid: AtomicU16::new(1),
           router: Mutex::new(router),
           echo: Mutex::new(EchoCache::new(&config.security)),
           exchanges: Mutex::new(ExchangeTable::new(&config.security)),
           sessions: Mutex::new(SessionTable::new(&config.security)),
           outer_blocks: Mutex::new(OuterBlockCache::new(&config.security)),
           observers: Mutex::new(ObserverRegistry::new()),
           provider: Mutex::new(provider),
           driver: Mutex::new(driver),
           rng: Mutex::new(rng),
           config,
           clock }
  }

  fn now(&self) -> Instant<C> {
    // the clocks this runtime is instantiated with cannot fail
    self.clock.try_now().expect("monotonic clock read failed")
  }

  fn next_mid(&self) -> Id {
    Id(self.next_mid.fetch_add(1, Ordering::Relaxed))
  }

  /// Process one inbound datagram, yielding the datagrams to send back.
  pub fn handle_datagram(&self, dgram: Addrd<&[u8]>) -> Vec<Addrd<Vec<u8>>> {
    let now = self.now();

    let req = match Message::try_from_bytes(dgram.data()) {
      | Ok(msg) => Addrd(msg, dgram.addr()),
      | Err(e) => return self.reject_malformed(dgram, e),
    };

    log::debug!("{} -> {}", req.addr(), crate::logging::msg_summary(req.data()));

    match req.data().code.kind() {
      | CodeKind::Empty if req.data().ty == Type::Con => {
        // CoAP ping
        let rst = req.data().reset(req.data().id);
        return self.emit(Addrd(rst, req.addr()));
      },
      | CodeKind::Empty | CodeKind::Response => return Vec::new(),
      | CodeKind::Request => (),
    }

    match self.process_request(req, now) {
      | Ok(Some(resp)) => self.emit(resp),
      | Ok(None) => Vec::new(),
      | Err((req, error)) => self.reject(&req, &error, now),
    }
  }

  /// Drive one socket read through the service.
  pub fn serve_once<S: Socket>(&self, socket: &S, buffer: &mut [u8]) -> nb::Result<(), S::Error> {
    let recvd = socket.recv(buffer)?;
    let dgram = Addrd(&buffer[..*recvd.data()], recvd.addr());

    // no table mutex is held anymore once handle_datagram returns
    for out in self.handle_datagram(dgram) {
      socket.send(out.as_ref().map(|v| v.as_slice()))?;
    }

    Ok(())
  }

  fn process_request(&self,
                     mut req: Addrd<Message>,
                     now: Instant<C>)
                     -> Result<Option<Addrd<Message>>, (Addrd<Message>, Error)> {
    if let Some(n) = registry::check_unsupported_critical(req.data()) {
      return Err((req, Error::UnsupportedCritical(n)));
    }

    if let Err(e) = block::validate_block_q_block_mixing(req.data()) {
      return Err((req, Error::Block(e)));
    }

    // out-of-range lengths: unrecognized-critical treatment for critical
    // options, silent removal for elective ones (RFC 7252 section 5.4.3)
    while let Some(n) = registry::check_lengths(req.data()) {
      if n.must_be_processed() == OptionMustBeProcessed::Yes {
        return Err((req, Error::UnsupportedCritical(n)));
      }
      req.data_mut().remove(n);
    }

    // outer Block1 reassembly runs before any security processing
    if req.data().block1().is_some() {
      let outcome = lock(&self.outer_blocks).process(&req, now);

      match outcome {
        | Ok(OuterBlockOutcome::NotCombined) => (),
        | Ok(OuterBlockOutcome::Continue(b)) => {
          return Ok(Some(respond::continue_response(&req, b)));
        },
        | Ok(OuterBlockOutcome::Complete(bytes)) => {
          match <Message as TryFromBytes<&[u8]>>::try_from_bytes(bytes.as_slice()) {
            | Ok(mut whole) => {
              whole.remove(BLOCK1);
              req = Addrd(whole, req.addr());
            },
            | Err(e) => return Err((req, Error::Malformed(e))),
          }
        },
        | Err(e) => return Err((req, Error::OuterBlock(e))),
      }
    }

    if self.config.server.proxy_enabled {
      match hop_limit::proxy_update(req.data_mut(), self.config.server.hop_limit_default) {
        | Ok(HopLimit::Ok(_)) => (),
        | Ok(HopLimit::Exhausted) => return Err((req, Error::HopLimitExhausted)),
        | Err(_) => {
          return Err((req, Error::InvalidOption(eft_msg::known::no_repeat::HOP_LIMIT)))
        },
      }
    }

    // security layer: combined fast path, then plain OSCORE
    let mut secured: Option<ContextId> = None;

    if req.data().has_edhoc() && req.data().oscore().is_some() {
      match self.combined_request(&req, now) {
        | Ok((inner, ctx)) => {
          secured = Some(ctx);
          req = inner;
        },
        | Err(e) => return Err((req, e)),
      }
    } else if req.data().oscore().is_some() {
      let unprotected = protect::unprotect_request(&mut *lock(&self.provider), req.data());

      match unprotected {
        | Ok((inner, ctx)) => {
          secured = Some(ctx);
          req = Addrd(inner, req.addr());
        },
        | Err(e) => return Err((req, Error::Security(e))),
      }
    }

    if let Some(ctx) = secured {
      let is_observe = req.data().observe() == Some(Action::Register);
      lock(&self.exchanges).add(req.addr(), req.data().token, is_observe, ctx, now);
    }

    let path = req.data().path_string().unwrap_or_default();

    // Echo amplification gate. The EDHOC resource is exempt: the
    // handshake carries its own freshness, and message_1 precedes any
    // state the peer could replay against.
    if path != ".well-known/edhoc" {
      let gate = {
        let mut rng = lock(&self.rng);
        lock(&self.echo).gate(&req, now, &mut *rng)
      };

      if let Gate::Challenge(nonce) = gate {
        log::debug!("challenging {} with a fresh Echo value", req.addr());
        let mut resp = respond::reply(&req, Code::UNAUTHORIZED);
        resp.data_mut().set_echo(&nonce).ok();
        return self.finish(req, resp, false, now);
      }
    }

    // route
    let resp = if path == ".well-known/edhoc" {
      let handled = {
        let mut sessions = lock(&self.sessions);
        let mut driver = lock(&self.driver);
        let mut provider = lock(&self.provider);
        handle_well_known_edhoc(req.data(), &mut sessions, &mut *driver, &mut *provider, now)
      };

      match handled {
        | Ok(reply) => {
          let has_body = !reply.payload.is_empty();
          let mut resp = respond::reply_payload(&req, Code::CHANGED, reply.payload);
          if has_body {
            resp.data_mut().set_content_format(eft_msg::ContentFormat::EdhocCborSeq).ok();
          }
          resp
        },
        | Err(e) => return Err((req, Error::EdhocTransport(e))),
      }
    } else {
      match lock(&self.router).route(&req) {
        | Ok(resp) => resp,
        | Err(e) => return Err((req, e)),
      }
    };

    // observe bookkeeping on successful GETs
    let mut resp = resp;
    let mut cancel_observe = false;

    if req.data().code == Code::GET && resp.data().code.class == 2 {
      match req.data().observe() {
        | Some(Action::Register) => {
          let age = {
            let mut observers = lock(&self.observers);
            observers.register(Observer { peer: req.addr(),
                                          token: req.data().token,
                                          path: path.clone() });
            observers.next_age_for(&path)
          };
          resp.data_mut().set_uint(OBSERVE, age).ok();
        },
        | Some(Action::Deregister) => {
          lock(&self.observers).deregister(req.addr(), req.data().token);
          cancel_observe = true;
        },
        | None => (),
      }
    }

    self.finish(req, resp, cancel_observe, now)
  }

  /// Protect (when an exchange demands it), apply No-Response
  /// suppression, and hand the response back for sending.
  fn finish(&self,
            req: Addrd<Message>,
            mut resp: Addrd<Message>,
            cancel_observe: bool,
            now: Instant<C>)
            -> Result<Option<Addrd<Message>>, (Addrd<Message>, Error)> {
    let suppressed = req.data().ty == Type::Non
                     && req.data()
                           .no_response()
                           .map(|mask| respond::suppressed_by_no_response(mask, resp.data().code))
                           .unwrap_or(false);

    let exchange = lock(&self.exchanges).find(req.addr(), req.data().token, now)
                                        .map(|e| (e.ctx, e.is_observe));

    if suppressed {
      // nothing goes out, but the exchange lifecycle still applies
      if let Some((_, is_observe)) = exchange {
        if !is_observe || cancel_observe {
          lock(&self.exchanges).remove(req.addr(), req.data().token);
        }
      }
      return Ok(None);
    }

    if let Some((ctx, is_observe)) = exchange {
      let protected =
        protect::protect_response(&mut *lock(&self.provider), ctx, resp.data(), is_observe);

      match protected {
        | Ok(outer) => resp = Addrd(outer, resp.addr()),
        | Err(_) => return Err((req, Error::Capacity)),
      }

      // non-Observe exchanges die with their response; a deregistration
      // explicitly kills an Observe exchange too
      if !is_observe || cancel_observe {
        lock(&self.exchanges).remove(req.addr(), req.data().token);
      }
    }

    Ok(Some(resp))
  }

  /// The RFC 9668 fast path: reassembled (or single-datagram) combined
  /// request, EDHOC message_3 first, then the OSCORE request it
  /// protects. C_R is the OSCORE kid.
  fn combined_request(&self,
                      req: &Addrd<Message>,
                      now: Instant<C>)
                      -> Result<(Addrd<Message>, ContextId), Error> {
    let value = req.data().oscore().ok_or(Error::Security(protect::SecurityError::Decode))?;
    let opt = OscoreOption::parse(value).map_err(|_| {
                                          Error::Security(protect::SecurityError::Decode)
                                        })?;

    let c_r: Vec<u8> = match opt.kid {
      | Some(kid) if !kid.is_empty() => kid.to_vec(),
      | _ => {
        return Err(Error::EdhocTransport(crate::edhoc::transport::EdhocTransportError::Protocol(
          DriverError::bad_message("combined request without kid"))))
      },
    };

    let (msg3, oscore_payload) =
      split_comb_payload(&req.data().payload.0).map_err(|e| {
        Error::EdhocTransport(crate::edhoc::transport::EdhocTransportError::Protocol(
          DriverError::bad_message(format!("combined payload: {e:?}"))))
      })?;

    let completed = {
      let mut sessions = lock(&self.sessions);
      let mut driver = lock(&self.driver);
      let mut provider = lock(&self.provider);
      complete_message_3(&mut sessions, &mut *driver, &mut *provider, &c_r, msg3)
    };

    let (ctx, _message_4) = completed.map_err(|e| {
      Error::EdhocTransport(crate::edhoc::transport::EdhocTransportError::Protocol(e))
    })?;

    let plain = lock(&self.provider).decrypt_request(ctx, opt.piv, oscore_payload)
                                    .map_err(|e| {
                                      Error::Security(protect::map_provider_error(e))
                                    })?;

    let mut outer = req.data().clone();
    outer.remove(EDHOC);

    let inner = protect::rebuild_inner(&outer, &plain).map_err(Error::Security)?;

    Ok((Addrd(inner, req.addr()), ctx))
  }

  /// Best-effort 4.00 for malformed datagrams: CON gets the answer,
  /// anything else gets silence.
  fn reject_malformed(&self,
                      dgram: Addrd<&[u8]>,
                      e: eft_msg::MessageParseError)
                      -> Vec<Addrd<Vec<u8>>> {
    log::debug!("dropping malformed datagram from {}: {e:?}", dgram.addr());

    let Some(&[byte1, _, id_hi, id_lo]) = dgram.data().get(..4) else {
      return Vec::new();
    };

    if (byte1 >> 4) & 0b11 != 0 {
      // not CON
      return Vec::new();
    }

    let pseudo = Addrd(Message::new(Type::Con,
                                    Code::EMPTY,
                                    Id(u16::from_be_bytes([id_hi, id_lo])),
                                    Token(Default::default())),
                       dgram.addr());

    match response_for(&Error::Malformed(e), &pseudo, None) {
      | Some(resp) => self.emit(resp),
      | None => Vec::new(),
    }
  }

  /// Run a failed request through the single wire mapper.
  fn reject(&self, req: &Addrd<Message>, error: &Error, now: Instant<C>) -> Vec<Addrd<Vec<u8>>> {
    log::debug!("{}: {error:?}", req.addr());

    // replay / freshness failures carry an Echo challenge
    let nonce = match error {
      | Error::Security(protect::SecurityError::Replay) => {
        let mut rng = lock(&self.rng);
        Some(lock(&self.echo).mint_challenge(req.addr(), now, &mut *rng))
      },
      | _ => None,
    };

    match response_for(error, req, nonce.as_deref()) {
      | Some(resp) => {
        // No-Response applies to error classes too (RFC 7967)
        if req.data().ty == Type::Non {
          if let Some(mask) = req.data().no_response() {
            if respond::suppressed_by_no_response(mask, resp.data().code) {
              return Vec::new();
            }
          }
        }

        self.emit(resp)
      },
      | None => Vec::new(),
    }
  }

  fn emit(&self, resp: Addrd<Message>) -> Vec<Addrd<Vec<u8>>> {
    let addr = resp.addr();
    match resp.unwrap().try_into_bytes::<Vec<u8>>() {
      | Ok(bytes) => vec![Addrd(bytes, addr)],
      | Err(e) => {
        log::error!("response serialization failed: {e:?}");
        Vec::new()
      },
    }
  }

  /// Notify every observer of `path` with a fresh representation.
  ///
  /// One call advances the resource age once; all notifications of this
  /// round carry it. Exchanges flagged `is_observe` keep protecting
  /// notifications until cancelled.
  pub fn notify(&self, path: &str, representation: &[u8]) -> Vec<Addrd<Vec<u8>>> {
    let now = self.now();

    let (age, targets) = {
      let mut observers = lock(&self.observers);
      let age = observers.next_age_for(path);
      let targets: Vec<Observer> = observers.observers_of(path)
                                            .filter_map(|h| observers.get(h).cloned())
                                            .collect();
      (age, targets)
    };

    let mut out = Vec::new();

    for observer in targets {
      let mut note = Message::new(Type::Non, Code::CONTENT, self.next_mid(), observer.token);
      note.set_uint(OBSERVE, age).ok();
      note.payload = Payload(representation.to_vec());

      let exchange = lock(&self.exchanges).find(observer.peer, observer.token, now)
                                          .filter(|e| e.is_observe)
                                          .map(|e| e.ctx);

      let note = match exchange {
        | Some(ctx) => {
          match protect::protect_response(&mut *lock(&self.provider), ctx, &note, true) {
            | Ok(protected) => protected,
            | Err(e) => {
              log::error!("dropping notification for {}: {e:?}", observer.peer);
              continue;
            },
          }
        },
        | None => note,
      };

      out.extend(self.emit(Addrd(note, observer.peer)));
    }

    out
  }

  /// Cancel an observation by identity: deregisters the observer and
  /// removes its OSCORE exchange.
  pub fn cancel_observation(&self, peer: std::net::SocketAddr, token: Token) {
    lock(&self.observers).deregister(peer, token);
    lock(&self.exchanges).remove(peer, token);
  }
}

#[cfg(test)]
mod tests {
  use eft_msg::known::no_repeat::HOP_LIMIT;
  use eft_msg::{observe, OptNumber, OptValue};
  use rand::rngs::mock::StepRng;

  use super::respond::{reply, reply_payload};
  use super::*;
  use crate::crypto::ProviderError;
  use crate::edhoc::session::SessionState;
  use crate::test::{dummy_addr, msg, ClockMock, MockDriver, MockProvider};

  type TestService = Service<ClockMock, MockProvider, MockDriver, StepRng>;

  fn service_with(config: Config) -> (TestService, ClockMock) {
    let clock = ClockMock::new();
    let router =
      Router::new().register("sensors/temp", &[("rt", "temperature-c")], |req: &Addrd<Message>| {
                     reply_payload(req, Code::CONTENT, b"21".to_vec())
                   })
                   .register("actuators/led", &[("rt", "light")], |req: &Addrd<Message>| {
                     reply(req, Code::CHANGED)
                   });

    (Service::new(config,
                  clock.clone(),
                  router,
                  MockProvider::new(),
                  MockDriver::new(),
                  StepRng::new(0xBEEF, 1)),
     clock)
  }

  fn service() -> (TestService, ClockMock) {
    service_with(Config::default())
  }

  fn dispatch(svc: &TestService, req: &Addrd<Message>) -> Vec<Addrd<Message>> {
    let bytes: Vec<u8> = req.data().clone().try_into_bytes().unwrap();
    svc.handle_datagram(Addrd(bytes.as_slice(), req.addr()))
       .into_iter()
       .map(|d| {
         Addrd(<Message as TryFromBytes<&[u8]>>::try_from_bytes(d.data().as_slice()).unwrap(),
               d.addr())
       })
       .collect()
  }

  fn one(svc: &TestService, req: &Addrd<Message>) -> Addrd<Message> {
    let mut out = dispatch(svc, req);
    assert_eq!(out.len(), 1, "expected exactly one response");
    out.remove(0)
  }

  fn get(path: &str) -> Addrd<Message> {
    let mut m = msg(Type::Con, Code::GET, 7, b"tok");
    m.set_path(path).unwrap();
    Addrd(m, dummy_addr())
  }

  #[test]
  fn plain_get_routes_and_mirrors_identity() {
    let (svc, _) = service();
    let resp = one(&svc, &get("sensors/temp"));

    assert_eq!(resp.data().code, Code::CONTENT);
    assert_eq!(resp.data().ty, Type::Ack);
    assert_eq!(resp.data().id, Id(7));
    assert_eq!(resp.data().token, Token::from_slice(b"tok"));
    assert_eq!(resp.data().payload.0, b"21");
  }

  #[test]
  fn unknown_path_is_not_found() {
    let (svc, _) = service();
    assert_eq!(one(&svc, &get("missing")).data().code, Code::NOT_FOUND);
  }

  #[test]
  fn con_ping_gets_rst() {
    let (svc, _) = service();
    let ping = Addrd(msg(Type::Con, Code::EMPTY, 42, b""), dummy_addr());
    let resp = one(&svc, &ping);
    assert_eq!(resp.data().ty, Type::Reset);
    assert_eq!(resp.data().id, Id(42));
  }

  #[test]
  fn malformed_con_gets_4_00_and_non_gets_silence() {
    let (svc, _) = service();

    // TKL 12: CON
    let out = svc.handle_datagram(Addrd(&[0x4C, 0x01, 0x12, 0x34][..], dummy_addr()));
    assert_eq!(out.len(), 1);
    let resp =
      <Message as TryFromBytes<&[u8]>>::try_from_bytes(out[0].data().as_slice()).unwrap();
    assert_eq!(resp.code, Code::BAD_REQUEST);
    assert_eq!(resp.id, Id(0x1234));

    // TKL 12: NON
    let out = svc.handle_datagram(Addrd(&[0x5C, 0x01, 0x12, 0x34][..], dummy_addr()));
    assert!(out.is_empty());

    // too short for any answer
    let out = svc.handle_datagram(Addrd(&[0x40][..], dummy_addr()));
    assert!(out.is_empty());
  }

  #[test]
  fn unknown_critical_option_is_4_02_for_con_silence_for_non() {
    let (svc, _) = service();

    let mut req = get("sensors/temp");
    req.data_mut().add(OptNumber(9999), OptValue(vec![])).unwrap();
    assert_eq!(one(&svc, &req).data().code, Code::BAD_OPTION);

    let mut req = get("sensors/temp");
    req.data_mut().ty = Type::Non;
    req.data_mut().add(OptNumber(9999), OptValue(vec![])).unwrap();
    assert!(dispatch(&svc, &req).is_empty());
  }

  #[test]
  fn mixing_block_and_q_block_is_4_00() {
    let (svc, _) = service();

    let mut req = get("sensors/temp");
    req.data_mut().set_block2(eft_msg::Block::new(0, 0, false).unwrap()).unwrap();
    req.data_mut().set_q_block2(eft_msg::Block::new(0, 0, false).unwrap()).unwrap();

    assert_eq!(one(&svc, &req).data().code, Code::BAD_REQUEST);
  }

  #[test]
  fn echo_challenge_then_pass() {
    let (svc, _) = service();

    // unverified POST is challenged, type mirrored
    let mut req = msg(Type::Con, Code::POST, 9, b"e1");
    req.set_path("actuators/led").unwrap();
    let req = Addrd(req, dummy_addr());

    let challenge = one(&svc, &req);
    assert_eq!(challenge.data().code, Code::UNAUTHORIZED);
    assert_eq!(challenge.data().ty, Type::Ack);
    let nonce = challenge.data().echo().unwrap().to_vec();
    assert!(!nonce.is_empty() && nonce.len() <= 40);

    // retry bearing the nonce passes and reaches the handler
    let mut retry = msg(Type::Con, Code::POST, 10, b"e2");
    retry.set_path("actuators/led").unwrap();
    retry.set_echo(&nonce).unwrap();
    let resp = one(&svc, &Addrd(retry, dummy_addr()));
    assert_eq!(resp.data().code, Code::CHANGED);

    // verified peers skip the dance entirely
    let mut again = msg(Type::Con, Code::POST, 11, b"e3");
    again.set_path("actuators/led").unwrap();
    let resp = one(&svc, &Addrd(again, dummy_addr()));
    assert_eq!(resp.data().code, Code::CHANGED);
  }

  fn oscore_request(kid: u8, payload: Vec<u8>) -> Addrd<Message> {
    let mut m = msg(Type::Con, Code::POST, 21, b"osc");
    m.set_oscore(&[0b0000_1001, 0x01, kid]).unwrap();
    m.payload = Payload(payload);
    Addrd(m, dummy_addr())
  }

  #[test]
  fn oscore_error_mapping_end_to_end() {
    let (svc, _) = service();

    // unknown kid -> unprotected 4.01 with Max-Age 0
    let resp = one(&svc, &oscore_request(0x42, b"x".to_vec()));
    assert_eq!(resp.data().code, Code::UNAUTHORIZED);
    assert_eq!(resp.data().max_age_seconds(), Some(0));
    assert!(resp.data().oscore().is_none());

    // replay -> unprotected 4.01 with an Echo challenge
    lock(&svc.provider).with_kid(&[0x42]);
    lock(&svc.provider).fail_decrypt_request = Some(ProviderError::ReplayWindowProtection);
    let resp = one(&svc, &oscore_request(0x42, b"x".to_vec()));
    assert_eq!(resp.data().code, Code::UNAUTHORIZED);
    assert_eq!(resp.data().max_age_seconds(), Some(0));
    assert!(resp.data().echo().is_some());
    assert!(resp.data().oscore().is_none());

    // decode failure -> unprotected 4.02
    lock(&svc.provider).fail_decrypt_request = Some(ProviderError::NotValidInputPacket);
    let resp = one(&svc, &oscore_request(0x42, b"x".to_vec()));
    assert_eq!(resp.data().code, Code::BAD_OPTION);
    assert_eq!(resp.data().max_age_seconds(), Some(0));

    // AEAD failure -> unprotected 4.00
    lock(&svc.provider).fail_decrypt_request = Some(ProviderError::DecryptionFailure);
    let resp = one(&svc, &oscore_request(0x42, b"x".to_vec()));
    assert_eq!(resp.data().code, Code::BAD_REQUEST);
  }

  /// Inner "GET /sensors/temp" framed as an OSCORE plaintext.
  fn inner_plaintext() -> Vec<u8> {
    let mut inner = msg(Type::Con, Code::GET, 0, b"");
    inner.set_path("sensors/temp").unwrap();
    protect::plaintext_of(Code::GET, inner.opts, b"").unwrap()
  }

  fn seed_session(svc: &TestService, c_r: &[u8], clock: &ClockMock) {
    lock(&svc.sessions).insert(c_r.to_vec(),
                               vec![0x0A],
                               b"TH2".to_vec(),
                               false,
                               clock.now());
  }

  /// Combined request, single datagram: EDHOC option + OSCORE option
  /// (kid = C_R) + `bstr(msg3) || OSCORE_PAYLOAD`.
  fn combined_request_msg(c_r: u8, comb_payload: Vec<u8>) -> Addrd<Message> {
    let mut m = msg(Type::Con, Code::POST, 31, b"cmb");
    m.set_edhoc().unwrap();
    m.set_oscore(&[0b0000_1001, 0x01, c_r]).unwrap();
    m.payload = Payload(comb_payload);
    Addrd(m, dummy_addr())
  }

  #[test]
  fn combined_request_single_block() {
    let (svc, clock) = service();
    seed_session(&svc, &[0x17], &clock);

    let msg3 = [&[0x4A][..], b"EDHOC_DATA"].concat(); // bstr(10)
    let comb = [msg3.as_slice(), inner_plaintext().as_slice()].concat();

    let resp = one(&svc, &combined_request_msg(0x17, comb));

    // the response is protected under the freshly derived context
    assert!(resp.data().oscore().is_some());
    assert_eq!(resp.data().code, Code::CHANGED);

    let inner =
      protect::unprotect_response(&mut *lock(&svc.provider), ContextId(0), resp.data()).unwrap();
    assert_eq!(inner.code, Code::CONTENT);
    assert_eq!(inner.payload.0, b"21");

    // context installed per RFC 9528 table 14 (Responder role)
    {
      let provider = lock(&svc.provider);
      let (_, material) = &provider.installed[0];
      assert_eq!(material.sender_id, vec![0x0A]);
      assert_eq!(material.recipient_id, vec![0x17]);
    }

    // session completed, non-Observe exchange removed after the send
    assert_eq!(lock(&svc.sessions).find_mut(&[0x17]).unwrap().state,
               SessionState::Completed);
    assert!(lock(&svc.exchanges).is_empty());
  }

  #[test]
  fn combined_request_with_outer_block1() {
    let (svc, clock) = service();
    seed_session(&svc, &[0x17], &clock);

    let msg3 = [&[0x4A][..], b"EDHOC_DATA"].concat();
    let comb = [msg3.as_slice(), inner_plaintext().as_slice()].concat();
    assert!(comb.len() > 16 && comb.len() <= 32);

    // block 0: full combined options, first 16 payload bytes
    let mut blk0 = combined_request_msg(0x17, comb[..16].to_vec());
    blk0.data_mut().add_request_tag(b"tag").unwrap();
    blk0.data_mut().set_block1(eft_msg::Block::new(0, 0, true).unwrap()).unwrap();

    let cont = one(&svc, &blk0);
    assert_eq!(cont.data().code, Code::CONTINUE);
    let echoed = cont.data().block1().unwrap();
    assert_eq!(echoed.num(), 0);
    assert!(echoed.more());
    assert_eq!(echoed.size(), 16);

    // block 1: bare continuation (token + Block1 + Request-Tag)
    let mut blk1 = msg(Type::Con, Code::POST, 32, b"cmb");
    blk1.add_request_tag(b"tag").unwrap();
    blk1.set_block1(eft_msg::Block::new(0, 1, false).unwrap()).unwrap();
    blk1.payload = Payload(comb[16..].to_vec());

    let resp = one(&svc, &Addrd(blk1, dummy_addr()));
    assert_eq!(resp.data().code, Code::CHANGED);
    assert!(resp.data().oscore().is_some());

    let inner =
      protect::unprotect_response(&mut *lock(&svc.provider), ContextId(0), resp.data()).unwrap();
    assert_eq!(inner.code, Code::CONTENT);
    assert_eq!(inner.payload.0, b"21");

    assert!(lock(&svc.outer_blocks).is_empty());
  }

  #[test]
  fn combined_request_tag_change_is_4_00_and_wipes_state() {
    let (svc, clock) = service();
    seed_session(&svc, &[0x17], &clock);

    let mut blk0 = combined_request_msg(0x17, vec![0xAA; 16]);
    blk0.data_mut().add_request_tag(b"tag").unwrap();
    blk0.data_mut().set_block1(eft_msg::Block::new(0, 0, true).unwrap()).unwrap();
    assert_eq!(one(&svc, &blk0).data().code, Code::CONTINUE);

    let mut blk1 = msg(Type::Con, Code::POST, 32, b"cmb");
    blk1.add_request_tag(b"changed").unwrap();
    blk1.set_block1(eft_msg::Block::new(0, 1, false).unwrap()).unwrap();
    blk1.payload = Payload(vec![0xBB; 16]);

    let resp = one(&svc, &Addrd(blk1, dummy_addr()));
    assert_eq!(resp.data().code, Code::BAD_REQUEST);
    assert!(lock(&svc.outer_blocks).is_empty());
  }

  #[test]
  fn well_known_edhoc_full_handshake() {
    let (svc, _) = service();

    let mut msg1 = msg(Type::Con, Code::POST, 51, b"ed1");
    msg1.set_path(".well-known/edhoc").unwrap();
    msg1.set_content_format(eft_msg::ContentFormat::CidEdhocCborSeq).unwrap();
    msg1.payload = Payload([&[0xF5][..], b"MSG1"].concat());

    let resp = one(&svc, &Addrd(msg1, dummy_addr()));
    assert_eq!(resp.data().code, Code::CHANGED);
    assert_eq!(resp.data().content_format(),
               Some(eft_msg::ContentFormat::EdhocCborSeq));
    assert_eq!(resp.data().payload.0, b"MSG2:\x00");

    let mut msg3 = msg(Type::Con, Code::POST, 52, b"ed3");
    msg3.set_path(".well-known/edhoc").unwrap();
    msg3.set_content_format(eft_msg::ContentFormat::CidEdhocCborSeq).unwrap();
    msg3.payload = Payload([&[0x00][..], b"MSG3"].concat());

    let resp = one(&svc, &Addrd(msg3, dummy_addr()));
    assert_eq!(resp.data().code, Code::CHANGED);
    assert!(resp.data().payload.0.is_empty());
    assert_eq!(lock(&svc.provider).installed.len(), 1);
  }

  #[test]
  fn well_known_edhoc_errors_carry_diagnostics() {
    let (svc, _) = service();
    lock(&svc.driver).fail_message_1 = Some(DriverError::bad_message("no such suite"));

    let mut msg1 = msg(Type::Con, Code::POST, 51, b"ed1");
    msg1.set_path(".well-known/edhoc").unwrap();
    msg1.set_content_format(eft_msg::ContentFormat::CidEdhocCborSeq).unwrap();
    msg1.payload = Payload([&[0xF5][..], b"MSG1"].concat());

    let resp = one(&svc, &Addrd(msg1, dummy_addr()));
    assert_eq!(resp.data().code, Code::BAD_REQUEST);
    assert_eq!(resp.data().content_format(),
               Some(eft_msg::ContentFormat::EdhocCborSeq));
    assert_eq!(crate::edhoc::transport::decode_error(&resp.data().payload.0),
               Some((1, "no such suite".to_string())));
  }

  #[test]
  fn hop_limit_exhaustion_at_a_proxy() {
    let mut config = Config::default();
    config.server.proxy_enabled = true;
    let (svc, _) = service_with(config);

    let mut req = get("sensors/temp");
    req.data_mut().set_hop_limit(1).unwrap();
    assert_eq!(one(&svc, &req).data().code, Code::HOP_LIMIT_REACHED);

    // value 2 survives the decrement and routes
    let mut req = get("sensors/temp");
    req.data_mut().set_hop_limit(2).unwrap();
    assert_eq!(one(&svc, &req).data().code, Code::CONTENT);

    // zero is not a legal value at all
    let mut req = get("sensors/temp");
    req.data_mut().add(HOP_LIMIT, OptValue(vec![0])).unwrap();
    assert_eq!(one(&svc, &req).data().code, Code::BAD_REQUEST);
  }

  #[test]
  fn no_response_suppresses_by_class() {
    let (svc, _) = service();

    let mut req = get("sensors/temp");
    req.data_mut().ty = Type::Non;
    req.data_mut().set_no_response(0b0000_0010).unwrap();
    assert!(dispatch(&svc, &req).is_empty());

    // 4.xx still allowed by that mask
    let mut req = get("missing");
    req.data_mut().ty = Type::Non;
    req.data_mut().set_no_response(0b0000_0010).unwrap();
    assert_eq!(one(&svc, &req).data().code, Code::NOT_FOUND);
  }

  #[test]
  fn observe_register_then_notify() {
    let (svc, _) = service();

    let mut req = get("sensors/temp");
    req.data_mut().set_observe(observe::Action::Register).unwrap();

    let resp = one(&svc, &req);
    assert_eq!(resp.data().code, Code::CONTENT);
    assert_eq!(resp.data().get_uint(OBSERVE), Some(crate::observe::FIRST_AGE));

    let notes = svc.notify("sensors/temp", b"22");
    assert_eq!(notes.len(), 1);
    let note =
      <Message as TryFromBytes<&[u8]>>::try_from_bytes(notes[0].data().as_slice()).unwrap();
    assert_eq!(note.token, Token::from_slice(b"tok"));
    assert_eq!(note.get_uint(OBSERVE), Some(crate::observe::FIRST_AGE + 1));
    assert_eq!(note.payload.0, b"22");

    // deregistration stops the notifications
    let mut dereg = get("sensors/temp");
    dereg.data_mut().set_observe(observe::Action::Deregister).unwrap();
    one(&svc, &dereg);
    assert!(svc.notify("sensors/temp", b"23").is_empty());
  }
}
