//! A minimal plaintext CoAP server on 0.0.0.0:5683.
//!
//! The security collaborators here are deliberately inert: every OSCORE
//! or EDHOC message is refused, so the service only speaks unprotected
//! CoAP. Wire in a real provider/driver pair to turn the security stack
//! on.
//!
//! ```text
//! cargo run --example server
//! coap-client -m get coap://127.0.0.1:5683/about
//! ```

use eft::config::Config;
use eft::crypto::{ContextId, DriverError, EdhocDriver, Message1Summary, Message3Summary,
                  OscoreMaterial, Provider, ProviderError};
use eft::net::Socket;
use eft::server::{respond, Router, Service};
use eft::std::{StdSocket, SystemClock};
use eft_msg::Code;
use rand::RngCore;

/// Refuses all OSCORE work; requests protected with it get 4.01.
#[derive(Debug)]
struct NoOscore;

impl Provider for NoOscore {
  fn kid_lookup(&self, _: Option<&[u8]>, _: Option<&[u8]>) -> Option<ContextId> {
    None
  }

  fn decrypt_request(&mut self, _: ContextId, _: Option<&[u8]>, _: &[u8]) -> Result<Vec<u8>, ProviderError> {
    Err(ProviderError::KidRecipientIdMismatch)
  }

  fn encrypt_response(&mut self, _: ContextId, _: &[u8], _: bool) -> Result<(Vec<u8>, Vec<u8>), ProviderError> {
    Err(ProviderError::Unknown)
  }

  fn encrypt_request(&mut self, _: ContextId, _: &[u8]) -> Result<(Vec<u8>, Vec<u8>), ProviderError> {
    Err(ProviderError::Unknown)
  }

  fn decrypt_response(&mut self, _: ContextId, _: &[u8], _: &[u8]) -> Result<Vec<u8>, ProviderError> {
    Err(ProviderError::Unknown)
  }

  fn install_context(&mut self, _: OscoreMaterial) -> Result<ContextId, ProviderError> {
    Err(ProviderError::Unknown)
  }

  fn discard_context(&mut self, _: ContextId) {}

  fn random_bytes(&mut self, out: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(out);
  }
}

/// Refuses all EDHOC handshakes.
#[derive(Debug)]
struct NoEdhoc;

impl EdhocDriver for NoEdhoc {
  fn message_1(&mut self, _: &[u8], _: &[u8]) -> Result<Message1Summary, DriverError> {
    Err(DriverError::bad_message("EDHOC not enabled on this server"))
  }

  fn message_3(&mut self, _: &[u8], _: &[u8], _: &[u8]) -> Result<Message3Summary, DriverError> {
    Err(DriverError::bad_message("EDHOC not enabled on this server"))
  }

  fn exporter(&self, _: &[u8], _: u32, _: usize) -> Result<Vec<u8>, DriverError> {
    Err(DriverError::internal("EDHOC not enabled on this server"))
  }
}

fn main() -> std::io::Result<()> {
  simple_logger::init_with_level(log::Level::Debug).ok();

  let router =
    Router::new().register("about",
                           &[("rt", "about"), ("if", "read")],
                           |req: &eft::net::Addrd<eft_msg::Message>| {
                             respond::reply_payload(req, Code::CONTENT, b"eft demo server".to_vec())
                           });

  let service = Service::new(Config::default(),
                             SystemClock::new(),
                             router,
                             NoOscore,
                             NoEdhoc,
                             rand::rngs::OsRng);

  let socket = StdSocket::bind("0.0.0.0:5683")?;
  log::info!("listening on {}", socket.local_addr());

  let mut buffer = vec![0u8; Config::default().server.message_size];

  loop {
    match service.serve_once(&socket, &mut buffer) {
      | Ok(()) => (),
      | Err(nb::Error::WouldBlock) => std::thread::sleep(std::time::Duration::from_millis(5)),
      | Err(nb::Error::Other(e)) => log::error!("socket error: {e}"),
    }
  }
}
