use eft_msg::Message;
use toad_len::Len;

/// One-line summary of a message for log output.
pub(crate) fn msg_summary(msg: &Message) -> String {
  format!("{:?} {:?} {} ({} bytes, {} byte payload)",
          msg.code.kind(),
          msg.ty,
          msg.code.to_string(),
          msg.len(),
          msg.payload.0.len())
}
