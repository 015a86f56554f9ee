//! Response framing helpers.
//!
//! Every server-originated reply mirrors the request: CON is answered
//! piggybacked on an ACK, NON with a NON, and the token always rides
//! along so the client's matcher finds it.

use eft_msg::{Block, Code, Message, Payload, Type};

use crate::net::Addrd;

/// A response to `req` with the given code, mirroring type, MID and
/// token.
pub fn reply(req: &Addrd<Message>, code: Code) -> Addrd<Message> {
  let ty = match req.data().ty {
    | Type::Con => Type::Ack,
    | _ => Type::Non,
  };

  let mut resp = Message::new(ty, code, req.data().id, req.data().token);
  resp.ver = req.data().ver;

  Addrd(resp, req.addr())
}

/// A response carrying a payload.
pub fn reply_payload(req: &Addrd<Message>, code: Code, payload: Vec<u8>) -> Addrd<Message> {
  let mut resp = reply(req, code);
  resp.data_mut().payload = Payload(payload);
  resp
}

/// The 2.31 Continue acknowledging one intermediate Block1, echoing the
/// block descriptor back (RFC 7959 section 2.9.1).
pub fn continue_response(req: &Addrd<Message>, block: Block) -> Addrd<Message> {
  let mut resp = reply(req, Code::CONTINUE);
  resp.data_mut().set_block1(block).ok();
  resp
}

/// Whether a No-Response mask from the request suppresses a response of
/// this code class (RFC 7967 section 2.1).
pub fn suppressed_by_no_response(mask: u8, code: Code) -> bool {
  match code.class {
    | 2 => mask & 0b0000_0010 != 0,
    | 4 => mask & 0b0000_1000 != 0,
    | 5 => mask & 0b0001_0000 != 0,
    | _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::{dummy_addr, msg};

  #[test]
  fn con_is_acked_and_non_mirrored() {
    let con = Addrd(msg(Type::Con, Code::GET, 7, b"tk"), dummy_addr());
    let resp = reply(&con, Code::CONTENT);
    assert_eq!(resp.data().ty, Type::Ack);
    assert_eq!(resp.data().id, con.data().id);
    assert_eq!(resp.data().token, con.data().token);

    let non = Addrd(msg(Type::Non, Code::GET, 7, b"tk"), dummy_addr());
    assert_eq!(reply(&non, Code::CONTENT).data().ty, Type::Non);
  }

  #[test]
  fn continue_echoes_the_block() {
    let req = Addrd(msg(Type::Con, Code::POST, 7, b"tk"), dummy_addr());
    let block = Block::new(2, 3, true).unwrap();
    let resp = continue_response(&req, block);

    assert_eq!(resp.data().code, Code::CONTINUE);
    assert_eq!(resp.data().block1(), Some(block));
  }

  #[test]
  fn no_response_suppression_is_per_class() {
    // empty mask: nothing suppressed
    assert!(!suppressed_by_no_response(0, Code::CONTENT));

    // suppress 2.xx only
    assert!(suppressed_by_no_response(2, Code::CONTENT));
    assert!(!suppressed_by_no_response(2, Code::NOT_FOUND));

    // suppress 4.xx and 5.xx
    assert!(suppressed_by_no_response(24, Code::NOT_FOUND));
    assert!(suppressed_by_no_response(24, Code::INTERNAL_SERVER_ERROR));
    assert!(!suppressed_by_no_response(24, Code::CONTENT));
  }
}
