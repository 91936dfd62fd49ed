//! A windowless backend that renders solid-color pages.
//!
//! It follows the notification sequence of a real engine (creation,
//! navigation, loading state, paints through shared memory) so the host can be
//! exercised end to end without one.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use super::backend::{BrowserBackend, CreateBrowserRequest, RemoteNotifier};
use crate::frame::{FrameWriter, SurfaceKind, BYTES_PER_PIXEL};
use crate::input::{key_codes, InputEvent, KeyEventType, EVENTFLAG_ALT_DOWN};
use crate::rpc::PreferenceResult;
use crate::types::{BrowserId, Rect, WindowHandle};

pub const DEFAULT_VIEWPORT: (i32, i32) = (800, 600);

/// Largest view edge the headless engine renders.
pub const MAX_VIEW_DIMENSION: i32 = 8192;

const FIRST_WINDOW_HANDLE: i64 = 0x10000;

struct HeadlessBrowser {
    window: WindowHandle,
    history: Vec<String>,
    position: usize,
    width: i32,
    height: i32,
    focused: bool,
    preferences: BTreeMap<String, Value>,
    view: FrameWriter,
}

impl HeadlessBrowser {
    fn current_url(&self) -> &str {
        self.history.get(self.position).map(String::as_str).unwrap_or("about:blank")
    }

    fn can_go_back(&self) -> bool {
        self.position > 0
    }

    fn can_go_forward(&self) -> bool {
        self.position + 1 < self.history.len()
    }

    fn push(&mut self, url: String) {
        if !self.history.is_empty() {
            self.history.truncate(self.position + 1);
        }
        self.history.push(url);
        self.position = self.history.len() - 1;
    }
}

/// In-process stand-in for a browser engine.
pub struct HeadlessBackend {
    ui_thread_id: i32,
    viewport: (i32, i32),
    next_window: AtomicI64,
    browsers: Mutex<HashMap<BrowserId, HeadlessBrowser>>,
    global_preferences: Mutex<BTreeMap<String, Value>>,
}

impl HeadlessBackend {
    pub fn new(ui_thread_id: i32) -> Self {
        Self {
            ui_thread_id,
            viewport: DEFAULT_VIEWPORT,
            next_window: AtomicI64::new(FIRST_WINDOW_HANDLE),
            browsers: Mutex::new(HashMap::new()),
            global_preferences: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_viewport(mut self, width: i32, height: i32) -> Self {
        self.viewport = (
            width.clamp(1, MAX_VIEW_DIMENSION),
            height.clamp(1, MAX_VIEW_DIMENSION),
        );
        self
    }

    pub fn viewport(&self) -> (i32, i32) {
        self.viewport
    }

    pub fn browser_count(&self) -> usize {
        self.browsers.lock().len()
    }

    pub fn browser_size(&self, browser_id: BrowserId) -> Option<(i32, i32)> {
        self.browsers
            .lock()
            .get(&browser_id)
            .map(|browser| (browser.width, browser.height))
    }

    pub fn global_preference(&self, name: &str) -> Option<Value> {
        self.global_preferences.lock().get(name).cloned()
    }

    fn navigate(&self, notifier: &RemoteNotifier, id: BrowserId, url: String) {
        let mut browsers = self.browsers.lock();
        let Some(browser) = browsers.get_mut(&id) else {
            trace!("Ignoring navigation of unknown browser {}", id);
            return;
        };

        debug!("Browser {} navigating to {}", id, url);
        notifier.loading_state(id, true, browser.can_go_back(), browser.can_go_forward());
        browser.push(url);
        notifier.address_changed(id, browser.current_url());
        notifier.title_changed(id, page_title(browser.current_url()));
        notifier.loading_state(id, false, browser.can_go_back(), browser.can_go_forward());
        paint(notifier, id, browser);
    }

    fn go(&self, notifier: &RemoteNotifier, id: BrowserId, back: bool) {
        let mut browsers = self.browsers.lock();
        let Some(browser) = browsers.get_mut(&id) else {
            return;
        };
        let allowed = if back {
            browser.can_go_back()
        } else {
            browser.can_go_forward()
        };
        if !allowed {
            return;
        }

        notifier.loading_state(id, true, browser.can_go_back(), browser.can_go_forward());
        if back {
            browser.position -= 1;
        } else {
            browser.position += 1;
        }
        notifier.address_changed(id, browser.current_url());
        notifier.title_changed(id, page_title(browser.current_url()));
        notifier.loading_state(id, false, browser.can_go_back(), browser.can_go_forward());
        paint(notifier, id, browser);
    }

    fn repaint(&self, notifier: &RemoteNotifier, id: BrowserId) {
        if let Some(browser) = self.browsers.lock().get_mut(&id) {
            paint(notifier, id, browser);
        }
    }

    fn devtools_reply(&self, notifier: &RemoteNotifier, id: BrowserId, message: &str) {
        let request: Value = match serde_json::from_str(message) {
            Ok(request) => request,
            Err(e) => {
                debug!("Ignoring malformed DevTools message for browser {}: {}", id, e);
                return;
            }
        };
        let Some(call_id) = request.get("id").cloned() else {
            return;
        };

        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let result = match method {
            "Page.navigate" => match request.pointer("/params/url").and_then(Value::as_str) {
                Some(url) => {
                    self.navigate(notifier, id, url.to_string());
                    json!({"frameId": id.to_string()})
                }
                None => {
                    let error = json!({"id": call_id, "error": {"code": -32602, "message": "url is required"}});
                    notifier.devtools_message(id, error.to_string());
                    return;
                }
            },
            "Page.reload" => {
                self.repaint(notifier, id);
                json!({})
            }
            "Target.getTargetInfo" => {
                let browsers = self.browsers.lock();
                let url = browsers.get(&id).map(|b| b.current_url().to_string()).unwrap_or_default();
                json!({"targetInfo": {"targetId": id.to_string(), "type": "page", "url": url, "title": page_title(&url)}})
            }
            _ => json!({}),
        };

        notifier.devtools_message(id, json!({"id": call_id, "result": result}).to_string());
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Host part of a URL, or the URL itself when it has none.
fn page_title(url: &str) -> String {
    match url.split_once("://") {
        Some((_, rest)) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or(rest);
            if host.is_empty() {
                url.to_string()
            } else {
                host.to_string()
            }
        }
        None => url.to_string(),
    }
}

/// Opaque BGRA color derived from the URL.
fn page_color(url: &str) -> [u8; 4] {
    let hash = url
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
    let [b, g, r, _] = hash.to_le_bytes();
    [b, g, r, 0xff]
}

fn paint(notifier: &RemoteNotifier, id: BrowserId, browser: &mut HeadlessBrowser) {
    let (width, height) = (browser.width, browser.height);
    let color = page_color(browser.current_url());
    let pixels = color.repeat(width as usize * height as usize);
    debug_assert_eq!(pixels.len(), width as usize * height as usize * BYTES_PER_PIXEL);

    match browser.view.write_frame(width, height, &pixels) {
        Ok(name) => notifier.paint(id, false, Rect::full(width, height), width, height, name),
        Err(e) => warn!("Failed to paint browser {}: {}", id, e),
    }
}

#[async_trait]
impl BrowserBackend for HeadlessBackend {
    fn ui_thread_id(&self) -> i32 {
        self.ui_thread_id
    }

    async fn create_browser(&self, notifier: &RemoteNotifier, request: CreateBrowserRequest) {
        let id = request.browser_id;
        let window = WindowHandle(self.next_window.fetch_add(1, Ordering::SeqCst));
        {
            let mut browsers = self.browsers.lock();
            if browsers.contains_key(&id) {
                warn!("Browser {} already exists", id);
                return;
            }
            browsers.insert(
                id,
                HeadlessBrowser {
                    window,
                    history: Vec::new(),
                    position: 0,
                    width: self.viewport.0,
                    height: self.viewport.1,
                    focused: false,
                    preferences: request.preferences,
                    view: FrameWriter::new(SurfaceKind::View),
                },
            );
        }

        info!("Created browser {} (window {}, parent {})", id, window, request.parent_window);
        notifier.browser_created(id, window);
        notifier.devtools_ready(id);
        self.navigate(notifier, id, request.url);
    }

    async fn close_browser(&self, notifier: &RemoteNotifier, browser_id: BrowserId) {
        let removed = self.browsers.lock().remove(&browser_id);
        match removed {
            Some(browser) => {
                info!("Closed browser {} (window {})", browser_id, browser.window);
                notifier.devtools_agent_detached(browser_id);
            }
            None => trace!("Close of unknown browser {}", browser_id),
        }
    }

    async fn load_url(&self, notifier: &RemoteNotifier, browser_id: BrowserId, url: String) {
        self.navigate(notifier, browser_id, url);
    }

    async fn set_focus(&self, _notifier: &RemoteNotifier, browser_id: BrowserId, focus: bool) {
        if let Some(browser) = self.browsers.lock().get_mut(&browser_id) {
            browser.focused = focus;
        }
    }

    async fn move_or_resize_started(&self, notifier: &RemoteNotifier, browser_id: BrowserId, rect: Rect) {
        let mut browsers = self.browsers.lock();
        let Some(browser) = browsers.get_mut(&browser_id) else {
            return;
        };
        if rect.is_empty() || (rect.width == browser.width && rect.height == browser.height) {
            return;
        }
        if rect.width > MAX_VIEW_DIMENSION || rect.height > MAX_VIEW_DIMENSION {
            warn!(
                "Ignoring resize of browser {} to {}x{}, limit is {}",
                browser_id, rect.width, rect.height, MAX_VIEW_DIMENSION
            );
            return;
        }

        debug!("Resizing browser {} to {}x{}", browser_id, rect.width, rect.height);
        browser.width = rect.width;
        browser.height = rect.height;
        paint(notifier, browser_id, browser);
    }

    async fn input(&self, notifier: &RemoteNotifier, browser_id: BrowserId, event: InputEvent) {
        let focused = match self.browsers.lock().get(&browser_id) {
            Some(browser) => browser.focused,
            None => return,
        };

        match event {
            InputEvent::MouseClick {
                event,
                button,
                mouse_up: false,
                ..
            } => {
                notifier.status_message(browser_id, format!("{} click at {},{}", button, event.x, event.y));
            }
            InputEvent::Key(key) if key.event_type == KeyEventType::Char && focused => {
                if let Some(ch) = char::from_u32(key.character as u32) {
                    notifier.status_message(browser_id, format!("key {}", ch));
                }
            }
            InputEvent::Key(key)
                if key.event_type == KeyEventType::RawKeyDown && key.modifiers & EVENTFLAG_ALT_DOWN != 0 =>
            {
                match key.windows_key_code {
                    key_codes::VK_LEFT => self.go(notifier, browser_id, true),
                    key_codes::VK_RIGHT => self.go(notifier, browser_id, false),
                    _ => {}
                }
            }
            other => trace!("Browser {} input {:?}", browser_id, other),
        }
    }

    async fn send_devtools_message(&self, notifier: &RemoteNotifier, browser_id: BrowserId, message: String) {
        if !self.browsers.lock().contains_key(&browser_id) {
            return;
        }
        self.devtools_reply(notifier, browser_id, &message);
    }

    async fn show_dev_tools(&self, notifier: &RemoteNotifier, browser_id: BrowserId) {
        if self.browsers.lock().contains_key(&browser_id) {
            notifier.status_message(browser_id, "DevTools are not available in headless mode");
        }
    }

    async fn request_frame(&self, notifier: &RemoteNotifier, browser_id: BrowserId) {
        self.repaint(notifier, browser_id);
    }

    async fn set_preference(&self, browser_id: Option<BrowserId>, name: &str, value: Value) -> PreferenceResult {
        if name.trim().is_empty() {
            return PreferenceResult::failed("Preference name must not be empty");
        }

        match browser_id {
            None => {
                self.global_preferences.lock().insert(name.to_string(), value);
                PreferenceResult::ok()
            }
            Some(id) => match self.browsers.lock().get_mut(&id) {
                Some(browser) => {
                    browser.preferences.insert(name.to_string(), value);
                    PreferenceResult::ok()
                }
                None => PreferenceResult::failed(format!("Unknown browser {}", id)),
            },
        }
    }

    async fn shutdown(&self) {
        let browsers = std::mem::take(&mut *self.browsers.lock());
        if !browsers.is_empty() {
            info!("Releasing {} browser(s)", browsers.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_title() {
        assert_eq!(page_title("https://example.com/path?q=1"), "example.com");
        assert_eq!(page_title("http://localhost:8080"), "localhost:8080");
        assert_eq!(page_title("about:blank"), "about:blank");
        assert_eq!(page_title("file:///tmp/x.html"), "file:///tmp/x.html");
    }

    #[test]
    fn test_page_color_is_opaque_and_stable() {
        let a = page_color("https://example.com");
        assert_eq!(a[3], 0xff);
        assert_eq!(a, page_color("https://example.com"));
        assert_ne!(a, page_color("https://example.org"));
    }

    #[test]
    fn test_history() {
        let mut browser = HeadlessBrowser {
            window: WindowHandle(1),
            history: Vec::new(),
            position: 0,
            width: 1,
            height: 1,
            focused: false,
            preferences: BTreeMap::new(),
            view: FrameWriter::new(SurfaceKind::View),
        };
        assert_eq!(browser.current_url(), "about:blank");

        browser.push("a".into());
        browser.push("b".into());
        browser.push("c".into());
        assert!(browser.can_go_back());
        assert!(!browser.can_go_forward());

        browser.position = 0;
        browser.push("d".into());
        assert_eq!(browser.history, vec!["a", "d"]);
        assert_eq!(browser.current_url(), "d");
    }

    #[tokio::test]
    async fn test_preferences() {
        let backend = HeadlessBackend::default();
        assert!(!backend.set_preference(None, "", json!(1)).await.success);
        assert!(backend.set_preference(None, "intl.accept_languages", json!("fr")).await.success);
        assert_eq!(backend.global_preference("intl.accept_languages"), Some(json!("fr")));

        let result = backend.set_preference(Some(BrowserId(9)), "x", json!(true)).await;
        assert_eq!(result, PreferenceResult::failed("Unknown browser 9"));

        let mut prefs = BTreeMap::new();
        prefs.insert("a".to_string(), json!(1));
        prefs.insert(" ".to_string(), json!(2));
        let results = backend.set_preferences(None, prefs).await;
        assert!(results["a"].success);
        assert!(!results[" "].success);
    }
}
