/// Content-Format values
pub mod content_format;
pub use content_format::*;

/// Observe
pub mod observe;
pub use observe::*;

/// Block
pub mod block;
pub use block::*;

/// OSCORE option value
pub mod oscore;
pub use oscore::*;

macro_rules! opt {
  (rfc7252($section:literal) $name:ident = $n:literal) => {
    #[doc = ::toad_macros::rfc_7252_doc!($section)]
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: crate::OptNumber = crate::OptNumber($n);
  };
  (#[doc = $doc:expr] $name:ident = $n:literal) => {
    #[doc = $doc]
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: crate::OptNumber = crate::OptNumber($n);
  };
}

pub(crate) use opt;

/// Non-repeatable options
pub mod no_repeat {
  use super::opt;

  opt!(rfc7252("5.10.1") HOST = 3);
  opt!(rfc7252("5.10.8.2") IF_NONE_MATCH = 5);
  opt!(#[doc = "<https://www.rfc-editor.org/rfc/rfc7641#section-2>"]
       OBSERVE = 6);
  opt!(#[doc = "See [`HOST`]"]
       PORT = 7);
  opt!(#[doc = "The OSCORE option, carrying the compressed COSE header \
                (flag byte, Partial IV, kid context, kid). \
                <https://www.rfc-editor.org/rfc/rfc8613#section-6.1>"]
       OSCORE = 9);
  opt!(rfc7252("5.10.3") CONTENT_FORMAT = 12);
  opt!(rfc7252("5.10.5") MAX_AGE = 14);
  opt!(#[doc = "The proxy loop-breaker: exactly one byte, decremented at \
                every hop. <https://www.rfc-editor.org/rfc/rfc8768#section-3>"]
       HOP_LIMIT = 16);
  opt!(rfc7252("5.10.4") ACCEPT = 17);
  opt!(#[doc = "Q-Block1: the faster-recovery sibling of Block1. May never \
                appear alongside Block1/Block2 in one message. \
                <https://www.rfc-editor.org/rfc/rfc9177#section-4>"]
       Q_BLOCK1 = 19);
  opt!(#[doc = "The EDHOC option: critical, Class U, always empty (any value \
                sent MUST be ignored by receivers), at most once. Signals \
                that the payload is an EDHOC+OSCORE combined request. \
                <https://www.rfc-editor.org/rfc/rfc9668#section-3.1>"]
       EDHOC = 21);
  opt!(#[doc = "Block2: descriptor of a block in a blockwise response \
                transfer. <https://www.rfc-editor.org/rfc/rfc7959#section-2>"]
       BLOCK2 = 23);
  opt!(#[doc = "Block1: descriptor of a block in a blockwise request \
                transfer. <https://www.rfc-editor.org/rfc/rfc7959#section-2>"]
       BLOCK1 = 27);
  opt!(rfc7252("5.10.9") SIZE2 = 28);
  opt!(#[doc = "Q-Block2: see [`Q_BLOCK1`]. \
                <https://www.rfc-editor.org/rfc/rfc9177#section-4>"]
       Q_BLOCK2 = 31);
  opt!(rfc7252("5.10.2") PROXY_URI = 35);
  opt!(#[doc = "See [`PROXY_URI`]"]
       PROXY_SCHEME = 39);
  opt!(rfc7252("5.10.9") SIZE1 = 60);
  opt!(#[doc = "The Echo freshness nonce, 1..=40 opaque bytes. \
                <https://www.rfc-editor.org/rfc/rfc9175#section-2.2>"]
       ECHO = 252);
  opt!(#[doc = "No-Response: a one-byte bitmask of response classes the \
                client is not interested in. \
                <https://www.rfc-editor.org/rfc/rfc7967#section-2>"]
       NO_RESPONSE = 258);
}

/// Repeatable options
pub mod repeat {
  use super::opt;

  opt!(rfc7252("5.10.8.1") IF_MATCH = 1);
  opt!(rfc7252("5.10.7") LOCATION_PATH = 8);
  opt!(#[doc = "See [`super::no_repeat::HOST`]"]
       PATH = 11);
  opt!(#[doc = "See [`super::no_repeat::HOST`]"]
       QUERY = 15);
  opt!(#[doc = "See [`LOCATION_PATH`]"]
       LOCATION_QUERY = 20);
  opt!(rfc7252("5.10.6") ETAG = 4);
  opt!(#[doc = "Request-Tag: the short-lived identifier that makes \
                concurrent blockwise request operations distinguishable. \
                Each value is 0..=8 opaque bytes; the *list* of values is \
                part of the blockwise operation key. \
                <https://www.rfc-editor.org/rfc/rfc9175#section-3>"]
       REQUEST_TAG = 292);
}
