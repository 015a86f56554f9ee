//! Uri-Path dispatch and `/.well-known/core` discovery.
//!
//! A resource is a path, a set of link-format attributes, and a
//! [`Handler`]: a callable with its own state, nothing more. New
//! resource kinds compose by wrapping handlers, not by subclassing
//! anything.

use eft_msg::{Code, ContentFormat, Message};

use crate::error::Error;
use crate::net::Addrd;
use crate::server::respond::reply_payload;

/// A resource handler: invoked after all framing, security, blockwise
/// and Echo checks pass, and expected to produce the full response
/// message.
pub trait Handler: Send {
  /// Produce the response for a request that routed here.
  fn handle(&mut self, req: &Addrd<Message>) -> Addrd<Message>;
}

impl<F> Handler for F where F: FnMut(&Addrd<Message>) -> Addrd<Message> + Send
{
  fn handle(&mut self, req: &Addrd<Message>) -> Addrd<Message> {
    self(req)
  }
}

struct Route {
  path: String,
  attrs: Vec<(String, String)>,
  handler: Box<dyn Handler>,
}

impl core::fmt::Debug for Route {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Route")
     .field("path", &self.path)
     .field("attrs", &self.attrs)
     .finish()
  }
}

/// The resource table.
///
/// Registration is monotonic: routes are added while building, then the
/// router moves into the service and no further registration happens.
#[derive(Debug, Default)]
pub struct Router {
  routes: Vec<Route>,
}

impl Router {
  /// An empty router.
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a resource at `path` with link-format attributes like
  /// `("rt", "temperature-c")`.
  pub fn register<H>(mut self, path: &str, attrs: &[(&str, &str)], handler: H) -> Self
    where H: Handler + 'static
  {
    self.routes.push(Route { path: path.trim_matches('/').to_string(),
                             attrs: attrs.iter()
                                         .map(|(k, v)| (k.to_string(), v.to_string()))
                                         .collect(),
                             handler: Box::new(handler) });
    self
  }

  /// Dispatch a request by Uri-Path.
  ///
  /// `/.well-known/core` is served here (GET only, filtered by query);
  /// `/.well-known/edhoc` is the dispatcher's business and never
  /// reaches the route table.
  pub fn route(&mut self, req: &Addrd<Message>) -> Result<Addrd<Message>, Error> {
    let path = req.data().path_string().map_err(|_| Error::NotFound)?;

    if path == ".well-known/core" {
      if req.data().code != Code::GET {
        return Err(Error::MethodNotAllowed);
      }

      let filter: Vec<String> = req.data()
                                   .query()
                                   .map(|qs| qs.into_iter().map(String::from).collect())
                                   .unwrap_or_default();

      let body = self.link_format(&filter);
      let mut resp = reply_payload(req, Code::CONTENT, body.into_bytes());
      resp.data_mut().set_content_format(ContentFormat::LinkFormat).ok();
      return Ok(resp);
    }

    match self.routes.iter_mut().find(|r| r.path == path) {
      | Some(route) => Ok(route.handler.handle(req)),
      | None => Err(Error::NotFound),
    }
  }

  /// Render the (possibly filtered) RFC 6690 link-format listing.
  ///
  /// Filters are `name=value` query items; `href` matches the path,
  /// anything else matches an attribute. A trailing `*` makes the match
  /// a prefix match.
  fn link_format(&self, filter: &[String]) -> String {
    let matches = |route: &Route, name: &str, want: &str| -> bool {
      let have: Option<&str> = if name == "href" {
        Some(&route.path)
      } else {
        route.attrs
             .iter()
             .find(|(k, _)| k == name)
             .map(|(_, v)| v.as_str())
      };

      match (have, want.strip_suffix('*')) {
        | (Some(have), Some(prefix)) => have.starts_with(prefix),
        | (Some(have), None) => have == want,
        | (None, _) => false,
      }
    };

    self.routes
        .iter()
        .filter(|r| {
          filter.iter().all(|q| match q.split_once('=') {
                              | Some((name, want)) => matches(r, name, want),
                              | None => true,
                            })
        })
        .map(|r| {
          let attrs: String = r.attrs
                               .iter()
                               .map(|(k, v)| format!(";{k}=\"{v}\""))
                               .collect();
          format!("</{}>{}", r.path, attrs)
        })
        .collect::<Vec<_>>()
        .join(",")
  }

  /// Number of registered resources.
  pub fn len(&self) -> usize {
    self.routes.len()
  }

  /// Whether no resource is registered.
  pub fn is_empty(&self) -> bool {
    self.routes.is_empty()
  }
}
