//! The error taxonomy and the one place it becomes wire bytes.
//!
//! Subsystems return their own narrow error kinds; everything funnels
//! into [`Error`] and exactly one function ([`response_for`]) decides
//! the response code, the framing (ACK for CON, NON for NON, silence
//! for what must be dropped), and the mandated decorations: `Max-Age: 0`
//! on OSCORE errors, the CBOR Sequence body with Content-Format 64 on
//! EDHOC errors, Size1 on 4.13.

use eft_msg::{Code, ContentFormat, Message, MessageParseError, OptNumber, Payload, Type};

use crate::block::BlockError;
use crate::edhoc::outer_block::OuterBlockError;
use crate::edhoc::transport::{encode_error, EdhocTransportError};
use crate::net::Addrd;
use crate::oscore::protect::SecurityError;

/// Everything that can go wrong between a datagram and its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
  /// Parse-level violation (header, option encoding, token length)
  Malformed(MessageParseError),
  /// A critical option we cannot process (RFC 7252 section 5.4.1)
  UnsupportedCritical(OptNumber),
  /// A known option carried an unusable value (e.g. Hop-Limit of 0)
  InvalidOption(OptNumber),
  /// OSCORE failure, already narrowed to its class
  Security(SecurityError),
  /// Blockwise protocol violation
  Block(BlockError),
  /// Outer-Block1 reassembly failure
  OuterBlock(OuterBlockError),
  /// A proxy decremented Hop-Limit to zero (RFC 8768)
  HopLimitExhausted,
  /// `/.well-known/edhoc` transport failure
  EdhocTransport(EdhocTransportError),
  /// No resource at the requested path
  NotFound,
  /// The resource exists but not for this method
  MethodNotAllowed,
  /// A table is full and nothing in it may be evicted
  Capacity,
}

/// Build the error response for a failed request, or `None` when policy
/// is to stay silent.
///
/// `echo_nonce` is the challenge to attach when the failure demands
/// freshness (OSCORE replay / Echo-required).
pub fn response_for(error: &Error,
                    req: &Addrd<Message>,
                    echo_nonce: Option<&[u8]>)
                    -> Option<Addrd<Message>> {
  let con = req.data().ty == Type::Con;

  // a NON transporting garbage gets silence, not amplification
  let quiet_on_non = matches!(error,
                              Error::Malformed(_)
                              | Error::UnsupportedCritical(_)
                              | Error::InvalidOption(_)
                              | Error::OuterBlock(OuterBlockError::RepeatedEdhocOption));
  if !con && quiet_on_non {
    return None;
  }

  let mut resp = Message::new(if con { Type::Ack } else { Type::Non },
                              Code::BAD_REQUEST,
                              req.data().id,
                              req.data().token);

  match error {
    | Error::Malformed(_) => {
      resp.code = Code::BAD_REQUEST;
    },

    | Error::UnsupportedCritical(_) => {
      resp.code = Code::BAD_OPTION;
    },

    | Error::InvalidOption(_) => {
      resp.code = Code::BAD_REQUEST;
    },

    | Error::Security(e) => {
      resp.code = match e {
        | SecurityError::Decode => Code::BAD_OPTION,
        | SecurityError::ContextMissing | SecurityError::Replay => Code::UNAUTHORIZED,
        | SecurityError::Decrypt => Code::BAD_REQUEST,
      };

      // never protected, never cached
      resp.set_max_age(0).ok();

      if *e == SecurityError::Replay {
        if let Some(nonce) = echo_nonce {
          resp.set_echo(nonce).ok();
        }
      }
    },

    | Error::Block(BlockError::TooLarge { limit }) => {
      resp.code = Code::REQUEST_ENTITY_TOO_LARGE;
      resp.set_size1(*limit as u32).ok();
    },

    | Error::Block(_) => {
      resp.code = Code::BAD_REQUEST;
    },

    | Error::OuterBlock(OuterBlockError::TooLarge { limit }) => {
      resp.code = Code::REQUEST_ENTITY_TOO_LARGE;
      resp.set_size1(*limit as u32).ok();
    },

    | Error::OuterBlock(OuterBlockError::RepeatedEdhocOption) => {
      resp.code = Code::BAD_OPTION;
    },

    | Error::OuterBlock(OuterBlockError::BadRequest) => {
      resp.code = Code::BAD_REQUEST;
    },

    | Error::HopLimitExhausted => {
      resp.code = Code::HOP_LIMIT_REACHED;
    },

    | Error::EdhocTransport(e) => match e {
      | EdhocTransportError::MethodNotAllowed => {
        resp.code = Code::METHOD_NOT_ALLOWED;
      },
      | EdhocTransportError::UnsupportedContentFormat => {
        resp.code = Code::UNSUPPORTED_CONTENT_FORMAT;
      },
      | EdhocTransportError::DuplicateContentFormat => {
        resp.code = Code::BAD_REQUEST;
      },
      | EdhocTransportError::Protocol(d) => {
        resp.code = if d.server_fault {
          Code::INTERNAL_SERVER_ERROR
        } else {
          Code::BAD_REQUEST
        };

        // diagnostic CBOR Sequence, never OSCORE-protected
        resp.set_content_format(ContentFormat::EdhocCborSeq).ok();
        resp.payload = Payload(encode_error(d.code, &d.info));
      },
    },

    | Error::NotFound => {
      resp.code = Code::NOT_FOUND;
    },

    | Error::MethodNotAllowed => {
      resp.code = Code::METHOD_NOT_ALLOWED;
    },

    | Error::Capacity => {
      resp.code = Code::INTERNAL_SERVER_ERROR;
    },
  }

  Some(Addrd(resp, req.addr()))
}
