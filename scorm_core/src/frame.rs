// Capability boundary between the player and the embedded content document.
// The player hands the runtime object to whatever owns the frame; in the
// browser that is global injection (wasm.rs), in tests an in-memory host.

use std::cell::RefCell;
use std::rc::Rc;

use url::{ParseError, Url};

use crate::error::SessionError;
use crate::runtime::LmsRuntime;

/// Shared handle to the session's runtime object. The embedded package and the
/// player both call through it; everything runs on one thread.
pub type ApiHandle = Rc<RefCell<LmsRuntime>>;

/// SCORM 1.2 global name.
pub const SCORM_12_GLOBAL: &str = "API";
/// SCORM 2004 global name.
pub const SCORM_2004_GLOBAL: &str = "API_1484_11";
/// Both names the runtime object is exposed under, always the same instance.
pub const GLOBAL_NAMES: [&str; 2] = [SCORM_12_GLOBAL, SCORM_2004_GLOBAL];

/// Something that can expose a runtime object to an embedded document.
pub trait ApiHost {
    /// Expose `api` under every name in `GLOBAL_NAMES` in the frame's scope.
    /// Failure is terminal for the session.
    fn install(&mut self, api: &ApiHandle) -> Result<(), SessionError>;

    /// Expose `api` in the frame's parent scope as well. Best effort: callers
    /// log and ignore failures (cross-origin parents).
    fn mirror_to_parent(&mut self, api: &ApiHandle) -> Result<(), SessionError>;
}

/// Serialized origin (`scheme://host[:port]`, default port dropped) of an
/// absolute URL. `None` for relative URLs and opaque origins.
pub fn origin_of(url: &str) -> Option<String> {
    Url::parse(url).ok().and_then(|url| tuple_origin(&url))
}

fn tuple_origin(url: &Url) -> Option<String> {
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Whether a `postMessage` from `origin` may drive the session. Absolute launch
/// URLs pin the content origin; relative ones are served by the host itself.
pub fn message_origin_allowed(origin: &str, launch_url: Option<&str>, host_origin: Option<&str>) -> bool {
    let Some(launch_url) = launch_url else {
        return false;
    };
    let expected = match Url::parse(launch_url) {
        Ok(url) => tuple_origin(&url),
        Err(ParseError::RelativeUrlWithoutBase) => host_origin.and_then(origin_of),
        Err(_) => None,
    };
    match (expected, origin_of(origin)) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Host that records what was installed where.
    #[derive(Default)]
    pub struct MemoryHost {
        pub frame_globals: Vec<(String, ApiHandle)>,
        pub parent_globals: Vec<(String, ApiHandle)>,
        pub deny_frame: bool,
        pub deny_parent: bool,
    }

    impl ApiHost for MemoryHost {
        fn install(&mut self, api: &ApiHandle) -> Result<(), SessionError> {
            if self.deny_frame {
                return Err(SessionError::Injection("frame scripting context unavailable".into()));
            }
            for name in GLOBAL_NAMES {
                self.frame_globals.push((name.to_string(), Rc::clone(api)));
            }
            Ok(())
        }

        fn mirror_to_parent(&mut self, api: &ApiHandle) -> Result<(), SessionError> {
            if self.deny_parent {
                return Err(SessionError::Injection("cross-origin parent".into()));
            }
            for name in GLOBAL_NAMES {
                self.parent_globals.push((name.to_string(), Rc::clone(api)));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_extraction() {
        assert_eq!(
            origin_of("https://CDN.example.org:8443/pkg/index.html?x=1").as_deref(),
            Some("https://cdn.example.org:8443")
        );
        assert_eq!(
            origin_of("http://user:pw@host.test#frag").as_deref(),
            Some("http://host.test")
        );
        assert_eq!(
            origin_of("https://cdn.example.org:443/pkg/index.html").as_deref(),
            Some("https://cdn.example.org")
        );
        assert_eq!(origin_of("/scorm/pkg/index.html"), None);
        assert_eq!(origin_of("data:text/html,<p>hi</p>"), None);
    }

    #[test]
    fn message_origins() {
        let cdn = Some("https://cdn.example.org/pkg/index.html");
        assert!(message_origin_allowed("https://cdn.example.org", cdn, None));
        assert!(!message_origin_allowed("https://evil.test", cdn, Some("https://evil.test")));
        assert!(message_origin_allowed("https://app.test", Some("/scorm/x.html"), Some("https://app.test")));
        assert!(!message_origin_allowed("https://app.test", Some("/scorm/x.html"), None));
        assert!(!message_origin_allowed("https://cdn.example.org", None, None));
        assert!(!message_origin_allowed("null", cdn, None));
    }

    #[test]
    fn default_ports_match_the_browser_origin() {
        let launch = Some("https://cdn.example.org:443/pkg/index.html");
        assert!(message_origin_allowed("https://cdn.example.org", launch, None));
        assert!(message_origin_allowed("https://CDN.example.org:443", launch, None));
        assert!(!message_origin_allowed("https://cdn.example.org:8443", launch, None));
        assert!(message_origin_allowed(
            "http://app.test",
            Some("scorm/index.html"),
            Some("http://app.test:80")
        ));
    }

    #[test]
    fn global_names_cover_both_revisions() {
        assert_eq!(GLOBAL_NAMES, ["API", "API_1484_11"]);
    }
}
