/// Version of the CoAP protocol that the message adheres to.
///
/// Parsing rejects anything other than 1; the field exists so that a
/// serialized message round-trips bit-for-bit.
///
/// See [RFC7252 - Message Details](https://datatracker.ietf.org/doc/html/rfc7252#section-3) for context
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Version(pub u8);

impl Default for Version {
  fn default() -> Self {
    Version(1)
  }
}
