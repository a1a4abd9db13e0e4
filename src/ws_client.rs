use std::{
    collections::HashMap,
    net::TcpStream,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tungstenite::{
    client::IntoClientRequest, http::HeaderValue, protocol::WebSocket, stream::MaybeTlsStream,
    Message,
};

use crate::{
    device_discovery::DeviceAddress,
    error::Result,
    record::Record,
    value::Value,
};

/// The WebSocket subprotocol spoken by the controller.
const SUBPROTOCOL: &str = "Lux_WS";

/// The navigation entry whose content page carries the live readings.
const INFORMATION_LABEL: &str = "Informationen";

const INITIAL_REFRESH_DELAY: Duration = Duration::from_millis(200);
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Granularity of the session thread's read polling.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for the peer to answer a close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocket<MaybeTlsStream<TcpStream>>;

/// Supplies the connection password for a WebSocket session.
///
/// The session blocks on [`PasswordPrompt::request_password`] before logging
/// in; returning `None` cancels the session. Any `Fn() -> Option<String>`
/// closure can serve as a prompt.
pub trait PasswordPrompt {
    /// Ask for the password, returning `None` to cancel the session.
    fn request_password(&self) -> Option<String>;
}

impl<F> PasswordPrompt for F
where
    F: Fn() -> Option<String>,
{
    fn request_password(&self) -> Option<String> {
        self()
    }
}

/// A streaming session of the text/XML WebSocket protocol.
///
/// After login the session sends a `REFRESH` command every second; the
/// controller answers with XML documents that are decoded into [`Record`]
/// values and handed to the consumer callback on the session thread. Field
/// names arrive separately from field values (`Content` versus `values`
/// messages) and are matched by their shared `id` attribute in two
/// session-scoped maps, so sequential sessions never see stale data.
///
/// A session owns its socket and its background thread exclusively; session
/// exclusivity is enforced by ownership of the `WsSession` value. Closing
/// (or dropping) the session cancels the refresh loop deterministically:
/// once [`WsSession::close`] returns, no further command is sent.
///
/// # Examples
///
/// ```rust,no_run
/// use luxtronik::{DeviceAddress, WsSession};
///
/// let address: DeviceAddress = "192.168.2.10:8214".parse().unwrap();
/// let prompt = || Some("999999".to_owned());
///
/// let session = WsSession::connect(&address, &prompt, |record| {
///     println!("update: {:?}", record);
/// })
/// .unwrap()
/// .expect("prompt was cancelled");
///
/// std::thread::sleep(std::time::Duration::from_secs(10));
/// session.close();
/// ```
#[derive(Debug)]
pub struct WsSession {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WsSession {
    /// Open a session and start streaming records to `consumer`.
    ///
    /// Blocks until the WebSocket handshake completed and the prompt
    /// yielded a credential, then returns while the session keeps running
    /// on its own thread. A blank password is sent as `"0"`, matching the
    /// controller's convention. Returns `Ok(None)` if the prompt cancelled,
    /// in which case the connection is closed again.
    pub fn connect<P, C>(
        address: &DeviceAddress,
        prompt: &P,
        consumer: C,
    ) -> Result<Option<WsSession>>
    where
        P: PasswordPrompt + ?Sized,
        C: FnMut(Record) + Send + 'static,
    {
        let url = format!("ws://{}:{}", address.host(), address.port());
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

        let (mut socket, _response) = tungstenite::connect(request)?;
        set_poll_timeout(&mut socket)?;

        let Some(password) = prompt.request_password() else {
            log::debug!("Password prompt cancelled, closing the session");
            if let Err(err) = socket.close(None) {
                log::debug!("Sending the close frame failed: {}", err);
            }
            drain_until_closed(&mut socket);
            return Ok(None);
        };

        let password = if password.is_empty() {
            "0".to_owned()
        } else {
            password
        };
        socket.send(Message::Text(format!("LOGIN;{}", password)))?;

        let stop = Arc::new(AtomicBool::new(false));
        let state = SessionState {
            socket,
            id_names: HashMap::new(),
            id_values: HashMap::new(),
            consumer: Box::new(consumer),
        };

        let handle = thread::Builder::new()
            .name("lux-ws-session".to_owned())
            .spawn({
                let stop = Arc::clone(&stop);
                move || state.run(&stop)
            })?;

        Ok(Some(WsSession {
            stop,
            handle: Some(handle),
        }))
    }

    /// Close the session.
    ///
    /// Cancels the refresh loop, sends a close frame and waits for the
    /// session thread to finish. When this returns, no further refresh can
    /// fire.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("WebSocket session thread panicked");
            }
        }
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct SessionState {
    socket: WsStream,
    id_names: HashMap<String, String>,
    id_values: HashMap<String, String>,
    consumer: Box<dyn FnMut(Record) + Send>,
}

impl SessionState {
    /// The session loop: sends the periodic refreshes, reads incoming
    /// frames and tears the connection down once `stop` is set or the peer
    /// closes. Fragmented text messages are reassembled by the WebSocket
    /// layer, so every received text message is one complete XML document.
    fn run(mut self, stop: &AtomicBool) {
        let mut next_refresh = Instant::now() + INITIAL_REFRESH_DELAY;
        let mut close_deadline: Option<Instant> = None;

        loop {
            match close_deadline {
                None => {
                    if stop.load(Ordering::SeqCst) {
                        if let Err(err) = self.socket.close(None) {
                            log::debug!("Sending the close frame failed: {}", err);
                        }
                        close_deadline = Some(Instant::now() + CLOSE_GRACE);
                    } else if Instant::now() >= next_refresh {
                        if let Err(err) = self.send("REFRESH") {
                            log::warn!("Sending REFRESH failed: {}", err);
                            break;
                        }
                        next_refresh += REFRESH_INTERVAL;
                    }
                }
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        log::debug!("Peer did not finish the close handshake in time");
                        break;
                    }
                }
            }

            match self.socket.read() {
                Ok(Message::Text(text)) => {
                    if close_deadline.is_none() {
                        self.dispatch(&text);
                    }
                }
                Ok(Message::Close(_)) => {
                    log::debug!("Peer closed the session");
                    if close_deadline.is_none() {
                        close_deadline = Some(Instant::now() + CLOSE_GRACE);
                    }
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref err)) if is_timeout(err) => {}
                Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => break,
                Err(err) => {
                    log::warn!("WebSocket session ended: {}", err);
                    break;
                }
            }
        }
    }

    fn send(&mut self, command: &str) -> tungstenite::Result<()> {
        self.socket.send(Message::Text(command.to_owned()))
    }

    /// Parse one complete message and dispatch it by its root element.
    /// Malformed XML drops the message, never the session.
    fn dispatch(&mut self, text: &str) {
        let doc = match roxmltree::Document::parse(text) {
            Ok(doc) => doc,
            Err(err) => {
                log::warn!("Dropping malformed XML message: {}", err);
                return;
            }
        };

        let root = doc.root_element();
        match root.tag_name().name() {
            "values" => self.handle_values(root),
            "Navigation" => self.handle_navigation(root),
            "Content" => self.handle_content(root),
            other => log::debug!("Ignoring message with root element {:?}", other),
        }
    }

    /// A `values` message updates the id-to-value map; every id that also
    /// has a known name contributes one field to the emitted record.
    fn handle_values(&mut self, root: roxmltree::Node<'_, '_>) {
        for child in root.children().filter(|n| n.is_element()) {
            if let Some(id) = child.attribute("id") {
                self.id_values.insert(id.to_owned(), element_text(child));
            }
        }

        let mut record = Record::new();
        for (id, value) in &self.id_values {
            if let Some(name) = self.id_names.get(id) {
                record.insert(name.clone(), Value::Str(value.clone()));
            }
        }

        if record.is_empty() {
            log::debug!("Values message without any named fields");
        } else {
            (self.consumer)(record);
        }
    }

    /// A `Navigation` message names the sections of the controller's menu;
    /// the information section's content is requested with `GET`. Only the
    /// first matching item matters.
    fn handle_navigation(&mut self, root: roxmltree::Node<'_, '_>) {
        for item in root.descendants().filter(|n| n.has_tag_name("item")) {
            if item_label(item) != INFORMATION_LABEL {
                continue;
            }
            match item.attribute("id") {
                Some(id) => {
                    let command = format!("GET;{}", id);
                    if let Err(err) = self.send(&command) {
                        log::warn!("Requesting the information section failed: {}", err);
                    }
                }
                None => log::debug!("Information item carries no id attribute"),
            }
            break;
        }
    }

    /// A `Content` message carries the field names; it only populates the
    /// id-to-name map and emits nothing.
    fn handle_content(&mut self, root: roxmltree::Node<'_, '_>) {
        for item in root.descendants().filter(|n| n.has_tag_name("item")) {
            if let Some(id) = item.attribute("id") {
                self.id_names.insert(id.to_owned(), item_label(item));
            }
        }
    }
}

fn element_text(node: roxmltree::Node<'_, '_>) -> String {
    node.descendants()
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_owned()
}

/// The label of an `item`, taken from its `name` child if it has one.
fn item_label(item: roxmltree::Node<'_, '_>) -> String {
    match item.children().find(|n| n.has_tag_name("name")) {
        Some(name) => element_text(name),
        None => element_text(item),
    }
}

fn set_poll_timeout(socket: &mut WsStream) -> Result<()> {
    match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(POLL_INTERVAL))?,
        _ => {}
    }

    Ok(())
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

fn drain_until_closed(socket: &mut WsStream) {
    let deadline = Instant::now() + CLOSE_GRACE;
    while Instant::now() < deadline {
        match socket.read() {
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref err)) if is_timeout(err) => {}
            Err(_) => break,
        }
    }
}
