// Browser adapter: the object injected into the content frame, the iframe
// host, a PersistenceClient over a JS object, and the player facade.
// JSON strings cross the boundary; JS is plumbing.

use std::rc::Rc;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use js_sys::{Array, Function, Promise, Reflect};
use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};
use web_sys::HtmlIFrameElement;

use crate::client::{PersistenceClient, Spawner};
use crate::config::PlayerConfig;
use crate::error::{ClientError, SessionError};
use crate::frame::{message_origin_allowed, ApiHandle, ApiHost, GLOBAL_NAMES};
use crate::logging::init_logging;
use crate::player::Player;
use crate::runtime::{lms_bool, LmsRuntime};
use crate::session::{CloseDecision, PlayerSession, ProgressMirror};
use crate::types::{
    CompletionCheck, ContentRef, LaunchInfo, LearnerId, ProgressSnapshot, SessionKey,
    StoredProgress, Timestamp, WatchRecord, WatchStatus, WrapperEvent,
};

// =============================================================================
// Injected runtime object
// =============================================================================

/// The object a SCORM package finds as `window.API` / `window.API_1484_11`.
#[wasm_bindgen(js_name = ScormApi)]
pub struct WasmScormApi {
    inner: ApiHandle,
}

impl WasmScormApi {
    pub fn new(inner: ApiHandle) -> Self {
        WasmScormApi { inner }
    }

    fn with<R>(&self, fallback: R, f: impl FnOnce(&mut LmsRuntime) -> R) -> R {
        match self.inner.try_borrow_mut() {
            Ok(mut runtime) => f(&mut runtime),
            Err(_) => fallback,
        }
    }

    fn initialize(&self) -> String {
        self.with(lms_bool(false).to_string(), |rt| lms_bool(rt.initialize()).to_string())
    }

    fn finish(&self) -> String {
        self.with(lms_bool(false).to_string(), |rt| lms_bool(rt.finish()).to_string())
    }

    fn commit(&self) -> String {
        self.with(lms_bool(false).to_string(), |rt| lms_bool(rt.commit()).to_string())
    }

    fn get_value(&self, method: &str, element: JsValue) -> String {
        self.with(String::new(), |rt| match element.as_string() {
            Some(element) => rt.get_value(&element),
            None => {
                rt.reject_argument(method);
                String::new()
            }
        })
    }

    fn set_value(&self, method: &str, element: JsValue, value: JsValue) -> String {
        self.with(lms_bool(false).to_string(), |rt| {
            match (element.as_string(), scalar_string(&value)) {
                (Some(element), Some(value)) => {
                    lms_bool(rt.set_value(&element, &value, Timestamp::now())).to_string()
                }
                _ => {
                    rt.reject_argument(method);
                    lms_bool(false).to_string()
                }
            }
        })
    }

    fn error_string(&self, code: JsValue) -> String {
        let code = scalar_string(&code).unwrap_or_default();
        self.with(String::new(), |rt| rt.get_error_string(&code))
    }

    fn diagnostic(&self, code: JsValue) -> String {
        let code = scalar_string(&code).unwrap_or_default();
        self.with(String::new(), |rt| rt.get_diagnostic(&code))
    }

    fn last_error(&self) -> String {
        self.with("0".to_string(), |rt| rt.get_last_error())
    }
}

/// Strings pass through, numbers and booleans are stringified, anything else is rejected.
fn scalar_string(value: &JsValue) -> Option<String> {
    if let Some(s) = value.as_string() {
        return Some(s);
    }
    if let Some(n) = value.as_f64() {
        return Some(format_number(n));
    }
    value.as_bool().map(|b| b.to_string())
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[wasm_bindgen(js_class = ScormApi)]
impl WasmScormApi {
    // SCORM 1.2

    #[wasm_bindgen(js_name = LMSInitialize)]
    pub fn lms_initialize(&self, _arg: JsValue) -> String {
        self.initialize()
    }

    #[wasm_bindgen(js_name = LMSFinish)]
    pub fn lms_finish(&self, _arg: JsValue) -> String {
        self.finish()
    }

    #[wasm_bindgen(js_name = LMSGetValue)]
    pub fn lms_get_value(&self, element: JsValue) -> String {
        self.get_value("LMSGetValue", element)
    }

    #[wasm_bindgen(js_name = LMSSetValue)]
    pub fn lms_set_value(&self, element: JsValue, value: JsValue) -> String {
        self.set_value("LMSSetValue", element, value)
    }

    #[wasm_bindgen(js_name = LMSCommit)]
    pub fn lms_commit(&self, _arg: JsValue) -> String {
        self.commit()
    }

    #[wasm_bindgen(js_name = LMSGetLastError)]
    pub fn lms_get_last_error(&self) -> String {
        self.last_error()
    }

    #[wasm_bindgen(js_name = LMSGetErrorString)]
    pub fn lms_get_error_string(&self, code: JsValue) -> String {
        self.error_string(code)
    }

    #[wasm_bindgen(js_name = LMSGetDiagnostic)]
    pub fn lms_get_diagnostic(&self, code: JsValue) -> String {
        self.diagnostic(code)
    }

    // SCORM 2004 aliases on the same instance

    #[wasm_bindgen(js_name = Initialize)]
    pub fn initialize_2004(&self, _arg: JsValue) -> String {
        self.initialize()
    }

    #[wasm_bindgen(js_name = Terminate)]
    pub fn terminate_2004(&self, _arg: JsValue) -> String {
        self.finish()
    }

    #[wasm_bindgen(js_name = GetValue)]
    pub fn get_value_2004(&self, element: JsValue) -> String {
        self.get_value("GetValue", element)
    }

    #[wasm_bindgen(js_name = SetValue)]
    pub fn set_value_2004(&self, element: JsValue, value: JsValue) -> String {
        self.set_value("SetValue", element, value)
    }

    #[wasm_bindgen(js_name = Commit)]
    pub fn commit_2004(&self, _arg: JsValue) -> String {
        self.commit()
    }

    #[wasm_bindgen(js_name = GetLastError)]
    pub fn get_last_error_2004(&self) -> String {
        self.last_error()
    }

    #[wasm_bindgen(js_name = GetErrorString)]
    pub fn get_error_string_2004(&self, code: JsValue) -> String {
        self.error_string(code)
    }

    #[wasm_bindgen(js_name = GetDiagnostic)]
    pub fn get_diagnostic_2004(&self, code: JsValue) -> String {
        self.diagnostic(code)
    }
}

// =============================================================================
// Frame host
// =============================================================================

/// Exposes the runtime object in an iframe's window and, best effort, in the
/// host window. Both scopes receive the same JS object.
pub struct IframeHost {
    frame: HtmlIFrameElement,
    exposed: Option<JsValue>,
}

impl IframeHost {
    pub fn new(frame: HtmlIFrameElement) -> Self {
        IframeHost { frame, exposed: None }
    }

    fn exposed(&mut self, api: &ApiHandle) -> JsValue {
        self.exposed
            .get_or_insert_with(|| JsValue::from(WasmScormApi::new(Rc::clone(api))))
            .clone()
    }
}

fn set_globals(scope: &JsValue, object: &JsValue) -> Result<(), SessionError> {
    for name in GLOBAL_NAMES {
        Reflect::set(scope, &JsValue::from_str(name), object)
            .map_err(|e| SessionError::Injection(format!("{}: {}", name, js_message(&e))))?;
    }
    Ok(())
}

impl ApiHost for IframeHost {
    fn install(&mut self, api: &ApiHandle) -> Result<(), SessionError> {
        let window = self
            .frame
            .content_window()
            .ok_or_else(|| SessionError::Injection("content frame has no window".into()))?;
        let object = self.exposed(api);
        set_globals(&window, &object)
    }

    fn mirror_to_parent(&mut self, api: &ApiHandle) -> Result<(), SessionError> {
        let window = web_sys::window()
            .ok_or_else(|| SessionError::Injection("no host window".into()))?;
        let object = self.exposed(api);
        set_globals(&window, &object)
    }
}

// =============================================================================
// Persistence client over a JS object
// =============================================================================

/// `PersistenceClient` backed by a JS object with Promise-returning methods:
/// `getLaunchUrl`, `loadProgress`, `saveProgress`, `checkCompletion`,
/// `recordWatch`, `getWatchStatus`. Arguments and results are JSON.
pub struct JsPersistenceClient {
    inner: JsValue,
}

impl JsPersistenceClient {
    pub fn new(inner: JsValue) -> Self {
        JsPersistenceClient { inner }
    }

    async fn call(&self, method: &str, args: &[JsValue]) -> Result<JsValue, ClientError> {
        let function = Reflect::get(&self.inner, &JsValue::from_str(method))
            .map_err(|e| ClientError::Rejected(js_message(&e)))?
            .dyn_into::<Function>()
            .map_err(|_| ClientError::Rejected(format!("client has no {} method", method)))?;
        let result = function
            .apply(&self.inner, &args.iter().collect::<Array>())
            .map_err(|e| ClientError::Rejected(js_message(&e)))?;
        JsFuture::from(Promise::resolve(&result))
            .await
            .map_err(|e| client_error(&e))
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, ClientError> {
    serde_json::to_string(value)
        .map(|s| JsValue::from_str(&s))
        .map_err(|e| ClientError::Rejected(e.to_string()))
}

fn from_js<T: DeserializeOwned>(value: JsValue) -> Result<T, ClientError> {
    let text = match value.as_string() {
        Some(text) => text,
        None => js_sys::JSON::stringify(&value)
            .map(String::from)
            .map_err(|e| ClientError::Decode(js_message(&e)))?,
    };
    Ok(serde_json::from_str(&text)?)
}

fn js_message(value: &JsValue) -> String {
    if let Some(s) = value.as_string() {
        return s;
    }
    Reflect::get(value, &JsValue::from_str("message"))
        .ok()
        .and_then(|m| m.as_string())
        .unwrap_or_else(|| format!("{:?}", value))
}

/// Rejections may carry an HTTP `status`; without one they are network errors.
fn client_error(value: &JsValue) -> ClientError {
    let message = js_message(value);
    let status = Reflect::get(value, &JsValue::from_str("status"))
        .ok()
        .and_then(|s| s.as_f64());
    match status {
        Some(s) if s as u16 == 404 => ClientError::NotFound(message),
        Some(s) => ClientError::Server { status: s as u16, message },
        None => ClientError::Network(message),
    }
}

#[async_trait(?Send)]
impl PersistenceClient for JsPersistenceClient {
    async fn launch_url(&self, content: &ContentRef) -> Result<LaunchInfo, ClientError> {
        from_js(self.call("getLaunchUrl", &[to_json(content)?]).await?)
    }

    async fn load_progress(&self, key: &SessionKey) -> Result<StoredProgress, ClientError> {
        let value = self.call("loadProgress", &[to_json(key)?]).await?;
        if value.is_null() || value.is_undefined() {
            return Ok(StoredProgress::default());
        }
        from_js(value)
    }

    async fn save_progress(&self, key: &SessionKey, snapshot: &ProgressSnapshot) -> Result<(), ClientError> {
        self.call("saveProgress", &[to_json(key)?, to_json(snapshot)?]).await?;
        Ok(())
    }

    async fn check_completion(&self, content: &ContentRef) -> Result<CompletionCheck, ClientError> {
        from_js(self.call("checkCompletion", &[to_json(content)?]).await?)
    }

    async fn record_watch(
        &self,
        content: &ContentRef,
        learner: &LearnerId,
        completion_percent: f64,
    ) -> Result<WatchRecord, ClientError> {
        let args = [
            to_json(content)?,
            JsValue::from_str(learner.as_str()),
            JsValue::from_f64(completion_percent),
        ];
        from_js(self.call("recordWatch", &args).await?)
    }

    async fn watch_status(&self, content: &ContentRef, learner: &LearnerId) -> Result<WatchStatus, ClientError> {
        let args = [to_json(content)?, JsValue::from_str(learner.as_str())];
        from_js(self.call("getWatchStatus", &args).await?)
    }
}

// =============================================================================
// Player facade
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerState<'a> {
    phase: crate::session::Phase,
    status: Option<crate::session::ViewingStatus>,
    content: Option<&'a ContentRef>,
    launch_url: Option<&'a str>,
    mirror: &'a ProgressMirror,
    completion_confirmed: bool,
    can_mark_done: bool,
    /// Keep ticking while set, even after close.
    pending_saves: bool,
}

impl<'a> PlayerState<'a> {
    fn of(session: &'a PlayerSession, now: Timestamp) -> Self {
        PlayerState {
            phase: session.phase(),
            status: session.status(),
            content: session.content(),
            launch_url: session.launch_url(),
            mirror: session.mirror(),
            completion_confirmed: session.completion_confirmed(),
            can_mark_done: session.can_mark_done(now),
            pending_saves: session.has_pending_saves(),
        }
    }
}

fn js_err(context: &str, e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{}: {}", context, e))
}

/// Player exposed to JavaScript. Async operations return Promises; the host
/// calls `tick()` on an interval and forwards `message` events.
#[wasm_bindgen]
pub struct WasmPlayer {
    player: Player<JsPersistenceClient>,
}

#[wasm_bindgen]
impl WasmPlayer {
    /// `client` is the JS persistence object; `config_json` a `PlayerConfig`.
    #[wasm_bindgen(constructor)]
    pub fn new(client: JsValue, config_json: &str, learner_id: &str, learner_name: &str) -> Result<WasmPlayer, JsValue> {
        let config = PlayerConfig::from_json(config_json).map_err(|e| js_err("Invalid config", e))?;
        init_logging(&config.log_level);
        let spawner: Spawner = Rc::new(|fut: LocalBoxFuture<'static, ()>| {
            wasm_bindgen_futures::spawn_local(fut)
        });
        let player = Player::new(
            Rc::new(JsPersistenceClient::new(client)),
            config,
            LearnerId::new(learner_id),
            learner_name,
            spawner,
        );
        Ok(WasmPlayer { player })
    }

    /// Open a content item: `{"id": "...", "kind": "scorm" | "video" | ...}`.
    pub fn open(&self, content_json: &str) -> Result<Promise, JsValue> {
        let content: ContentRef =
            serde_json::from_str(content_json).map_err(|e| js_err("Invalid content", e))?;
        let player = self.player.clone();
        Ok(future_to_promise(async move {
            player.open(content).await;
            Ok(JsValue::UNDEFINED)
        }))
    }

    pub fn retry(&self) -> Promise {
        let player = self.player.clone();
        future_to_promise(async move {
            player.retry().await.map_err(|e| js_err("Retry failed", e))?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Call from the iframe's `load` event.
    #[wasm_bindgen(js_name = attachFrame)]
    pub fn attach_frame(&self, frame: HtmlIFrameElement) -> Promise {
        let player = self.player.clone();
        future_to_promise(async move {
            let mut host = IframeHost::new(frame);
            player
                .attach_frame(&mut host)
                .await
                .map_err(|e| js_err("Could not start content", e))?;
            Ok(JsValue::UNDEFINED)
        })
    }

    pub fn tick(&self) {
        self.player.tick();
    }

    /// Forward a `message` event. Returns whether it was accepted.
    #[wasm_bindgen(js_name = handleMessage)]
    pub fn handle_message(&self, origin: &str, data: JsValue) -> bool {
        let launch_url = self.player.session().launch_url().map(str::to_string);
        let host_origin = web_sys::window().and_then(|w| w.location().origin().ok());
        if !message_origin_allowed(origin, launch_url.as_deref(), host_origin.as_deref()) {
            tracing::debug!(origin, "message from unexpected origin ignored");
            return false;
        }
        match from_js::<WrapperEvent>(data) {
            Ok(event) => {
                self.player.handle_message(&event);
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "unrecognized message payload");
                false
            }
        }
    }

    #[wasm_bindgen(js_name = canMarkDone)]
    pub fn can_mark_done(&self) -> bool {
        self.player.can_mark_done()
    }

    #[wasm_bindgen(js_name = markDone)]
    pub fn mark_done(&self) -> Promise {
        let player = self.player.clone();
        future_to_promise(async move {
            player.mark_done().await.map_err(|e| js_err("Cannot mark done", e))?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = mediaFinished)]
    pub fn media_finished(&self, completion_percent: f64) -> Promise {
        let player = self.player.clone();
        future_to_promise(async move {
            player.media_finished(completion_percent).await;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Returns `"closed"` or `"confirm"`.
    #[wasm_bindgen(js_name = requestClose)]
    pub fn request_close(&self) -> Result<String, JsValue> {
        let decision = self.player.request_close().map_err(|e| js_err("Cannot close", e))?;
        Ok(match decision {
            CloseDecision::Closed => "closed",
            CloseDecision::ConfirmationRequired => "confirm",
        }
        .to_string())
    }

    #[wasm_bindgen(js_name = cancelClose)]
    pub fn cancel_close(&self) -> Result<(), JsValue> {
        self.player.cancel_close().map_err(|e| js_err("Cannot stay", e))
    }

    #[wasm_bindgen(js_name = confirmClose)]
    pub fn confirm_close(&self) -> Result<(), JsValue> {
        self.player.confirm_close().map_err(|e| js_err("Cannot close", e))
    }

    /// Pending session events as a JSON array.
    #[wasm_bindgen(js_name = drainEvents)]
    pub fn drain_events(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.player.drain_events())
            .map_err(|e| js_err("Serialization error", e))
    }

    /// Snapshot of the session for rendering, as JSON.
    pub fn state(&self) -> Result<String, JsValue> {
        let session = self.player.session();
        serde_json::to_string(&PlayerState::of(&session, Timestamp::now()))
            .map_err(|e| js_err("Serialization error", e))
    }
}
