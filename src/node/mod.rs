//! Connection to one backend node.
//!
//! A [`Node`] owns the control websocket and the REST client of one backend.
//! The websocket runs in its own task that reads frames and writes outgoing
//! messages; every inbound frame is dispatched synchronously from that task.
//!
//! # Lifecycle
//!
//! 1. [`Node::connect`] opens the websocket with the client identity headers
//! 2. `ready` captures the session id, which unlocks the session-scoped REST
//!    operations
//! 3. When the socket closes for any reason other than [`Node::destroy`], a
//!    reconnect is scheduled after the retry delay
//! 4. After the configured number of attempts, the node reports a fatal error
//!    and destroys itself
//!
//! Every connection gets an epoch. Handlers of a socket that was replaced in
//! the meantime see an outdated epoch and do nothing.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
};

use futures_util::{SinkExt, StreamExt};
use http::{header::AUTHORIZATION, HeaderValue};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
    time,
};
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    handshake::client::Request,
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
};

use crate::{
    config::{ManagerOptions, NodeOptions},
    error::{Error, Result},
    events::Event,
    http::Client,
    manager::{Command, Manager},
    protocol::Stats,
};

mod dispatch;
mod rest;

/// Close code sent when a node is destroyed on purpose.
const CLOSE_DESTROY_CODE: u16 = 1000;

/// Close reason sent when a node is destroyed on purpose.
const CLOSE_DESTROY_REASON: &str = "destroy";

/// Close code reported when the connection dropped without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;

/// Close code reported when the close frame carried no status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Value of the attempt counter before the first connection.
pub const INITIAL_RECONNECT_ATTEMPTS: u32 = 1;

/// A backend node.
pub struct Node {
    options: NodeOptions,
    manager: Weak<dyn Manager>,
    http: Client,

    /// REST calls made so far, successful or not.
    calls: AtomicU64,

    state: Mutex<State>,
}

/// Connection state of a node.
struct State {
    session_id: Option<String>,
    stats: Stats,
    socket: Option<Socket>,
    reconnect_attempts: u32,
    reconnect_timer: Option<AbortHandle>,

    /// Epoch of the most recent connection.
    epoch: u64,

    /// Whether `connect` was called at least once.
    initialized: bool,
}

/// Handle of the task running one websocket connection.
struct Socket {
    epoch: u64,
    outgoing: mpsc::UnboundedSender<Outgoing>,

    /// Whether the handshake completed.
    open: bool,

    task: AbortHandle,
}

/// Requests to the task running a websocket connection.
enum Outgoing {
    /// Sends a message and reports the outcome.
    Message(Message, oneshot::Sender<Result<()>>),

    /// Sends a close frame and ends the connection.
    Close(CloseFrame),
}

impl State {
    fn is_current(&self, epoch: u64) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|socket| socket.epoch == epoch)
    }
}

impl Node {
    /// Creates a node for `options`, reporting to `manager`.
    ///
    /// The node is not connected yet; call [`Node::connect`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the options are invalid or do not form a
    /// valid URL.
    pub fn new(options: NodeOptions, manager: Weak<dyn Manager>) -> Result<Arc<Self>> {
        let options = options.validate()?;

        let user_agent = manager.upgrade().map_or_else(
            || ManagerOptions::default().client_name,
            |manager| manager.options().client_name.clone(),
        );
        let http = Client::new(&options, &user_agent)?;

        Ok(Arc::new(Self {
            options,
            manager,
            http,
            calls: AtomicU64::new(0),
            state: Mutex::new(State {
                session_id: None,
                stats: Stats::default(),
                socket: None,
                reconnect_attempts: INITIAL_RECONNECT_ATTEMPTS,
                reconnect_timer: None,
                epoch: 0,
                initialized: false,
            }),
        }))
    }

    /// Unique key of this node within its manager.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.options.identifier()
    }

    #[must_use]
    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// `host:port` of the node.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.options.host, self.options.port)
    }

    /// Base URL of the REST surface.
    #[must_use]
    pub fn rest_url(&self) -> &url::Url {
        self.http.base_url()
    }

    /// URL of the control websocket.
    #[must_use]
    pub fn socket_url(&self) -> String {
        let scheme = if self.options.secure { "wss" } else { "ws" };
        let version = self
            .options
            .version_path()
            .map(|version| format!("/{version}"))
            .unwrap_or_default();
        format!("{scheme}://{}{version}/websocket", self.address())
    }

    /// Voice regions this node prefers, lowercase.
    #[must_use]
    pub fn regions(&self) -> &[String] {
        &self.options.regions
    }

    /// REST calls made so far.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Most recent statistics reported by the node.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.lock_state().stats.clone()
    }

    /// Session id received in the last `ready` frame.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.lock_state().session_id.clone()
    }

    /// Connection attempts made since the node was created or destroyed.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock_state().reconnect_attempts
    }

    /// Whether `connect` was called at least once.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lock_state().initialized
    }

    /// Whether the websocket is open.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.lock_state()
            .socket
            .as_ref()
            .is_some_and(|socket| socket.open)
    }

    /// Opens the control websocket.
    ///
    /// Does nothing while a connection is open or being opened. Connection
    /// failures are reported as [`Event::NodeError`] followed by
    /// [`Event::NodeDisconnect`], and retried.
    pub fn connect(self: &Arc<Self>) {
        let mut state = self.lock_state();
        if state.socket.is_some() {
            return;
        }

        state.initialized = true;
        state.epoch += 1;
        let epoch = state.epoch;

        let (outgoing, commands) = mpsc::unbounded_channel();
        let task = tokio::spawn(Arc::clone(self).run(epoch, commands));

        state.socket = Some(Socket {
            epoch,
            outgoing,
            open: false,
            task: task.abort_handle(),
        });
        drop(state);

        debug!("connecting to node {} at {}", self.identifier(), self.socket_url());
    }

    /// Destroys the node.
    ///
    /// Does nothing if the node is not connected. Otherwise destroys every
    /// player bound to the node, closes the websocket without reconnecting,
    /// emits [`Event::NodeDestroy`] and removes the node from its manager.
    pub fn destroy(&self) {
        if !self.connected() {
            return;
        }

        self.teardown();
    }

    /// Sends a JSON object over the websocket.
    ///
    /// Returns `Ok(false)` without sending if the node is not connected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `data` does not serialize to a JSON
    /// object, or the transport error if the socket failed to send.
    pub async fn send<T>(&self, data: &T) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        let Some(done) = self.enqueue(data)? else {
            return Ok(false);
        };

        match done.await {
            Ok(result) => result.map(|()| true),
            // The connection ended before the message was written.
            Err(_) => Ok(false),
        }
    }

    /// Queues a JSON object on the open websocket without waiting for it to
    /// be written.
    ///
    /// Returns `Ok(None)` if the node is not connected, otherwise a receiver
    /// for the result of the write. Messages are written in the order they
    /// were queued, ahead of any close frame queued after them.
    pub(crate) fn enqueue<T>(&self, data: &T) -> Result<Option<oneshot::Receiver<Result<()>>>>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(data)?;

        let state = self.lock_state();
        let Some(socket) = state.socket.as_ref().filter(|socket| socket.open) else {
            return Ok(None);
        };

        if !value.is_object() {
            return Err(Error::invalid_argument(format!(
                "only JSON objects can be sent, got: {value}"
            )));
        }

        let text = value.to_string();
        trace!("{} <- {text}", self.identifier());

        let (done, result) = oneshot::channel();
        if socket
            .outgoing
            .send(Outgoing::Message(Message::text(text), done))
            .is_err()
        {
            return Ok(None);
        }

        Ok(Some(result))
    }

    /// Runs one websocket connection until it closes.
    async fn run(self: Arc<Self>, epoch: u64, mut commands: mpsc::UnboundedReceiver<Outgoing>) {
        let request = match self.upgrade_request() {
            Ok(request) => request,
            Err(e) => {
                self.on_error(epoch, e);
                self.on_close(epoch, CLOSE_ABNORMAL, String::new());
                return;
            }
        };

        let ws_stream = match tokio_tungstenite::connect_async(request).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                self.on_error(epoch, e.into());
                self.on_close(epoch, CLOSE_ABNORMAL, String::new());
                return;
            }
        };

        self.on_open(epoch);
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_rx.next() => match message {
                    Some(Ok(Message::Text(text))) => self.on_message(epoch, text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or_else(
                            || (CLOSE_NO_STATUS, String::new()),
                            |frame| (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        );
                        self.on_close(epoch, code, reason);
                        return;
                    }
                    Some(Ok(message)) => trace!("{} ignoring {message:?}", self.identifier()),
                    Some(Err(e)) => {
                        self.on_error(epoch, e.into());
                        self.on_close(epoch, CLOSE_ABNORMAL, String::new());
                        return;
                    }
                    None => {
                        self.on_close(epoch, CLOSE_ABNORMAL, String::new());
                        return;
                    }
                },

                Some(command) = commands.recv() => match command {
                    Outgoing::Message(message, done) => {
                        let result = ws_tx.send(message).await.map_err(Into::into);
                        let _ = done.send(result);
                    }
                    Outgoing::Close(frame) => {
                        if let Err(e) = ws_tx.send(Message::Close(Some(frame))).await {
                            debug!("{} failed to send close frame: {e}", self.identifier());
                        }
                        return;
                    }
                },
            }
        }
    }

    /// Builds the websocket upgrade request with the client identity.
    fn upgrade_request(&self) -> Result<Request> {
        let manager = self.manager()?;
        let options = manager.options();

        let mut request = self.socket_url().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&self.options.password)?);
        headers.insert("num-shards", HeaderValue::from(options.shards));
        headers.insert("user-id", HeaderValue::from_str(&options.client_id)?);
        headers.insert("client-name", HeaderValue::from_str(&options.client_name)?);

        Ok(request)
    }

    fn on_open(&self, epoch: u64) {
        let mut state = self.lock_state();
        if !state.is_current(epoch) {
            return;
        }

        if let Some(socket) = state.socket.as_mut() {
            socket.open = true;
        }
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        drop(state);

        info!("connected to node {}", self.identifier());
        self.emit(Event::NodeConnect {
            node: self.identifier().to_owned(),
        });
    }

    fn on_message(&self, epoch: u64, text: &str) {
        if !self.lock_state().is_current(epoch) {
            return;
        }

        trace!("{} -> {text}", self.identifier());
        match serde_json::from_str(text) {
            Ok(value) => self.handle_message(value),
            Err(e) => self.report(e.into()),
        }
    }

    fn on_error(&self, epoch: u64, error: Error) {
        if self.lock_state().is_current(epoch) {
            self.report(error);
        }
    }

    fn on_close(self: &Arc<Self>, epoch: u64, code: u16, reason: String) {
        let mut state = self.lock_state();
        if !state.is_current(epoch) {
            return;
        }
        state.socket = None;
        // A session belongs to one connection; the next one announces its own.
        state.session_id = None;
        drop(state);

        info!(
            "disconnected from node {} with code {code}: {reason}",
            self.identifier()
        );
        let destroyed = code == CLOSE_DESTROY_CODE && reason == CLOSE_DESTROY_REASON;
        self.emit(Event::NodeDisconnect {
            node: self.identifier().to_owned(),
            code,
            reason,
        });

        if !destroyed {
            self.reconnect();
        }
    }

    /// Schedules the next connection attempt after the retry delay,
    /// replacing any pending one.
    fn reconnect(self: &Arc<Self>) {
        let node = Arc::downgrade(self);
        let delay = self.options.retry_delay;
        let timer = tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(node) = node.upgrade() {
                node.retry();
            }
        });

        let mut state = self.lock_state();
        if let Some(pending) = state.reconnect_timer.replace(timer.abort_handle()) {
            pending.abort();
        }
    }

    /// Makes the next connection attempt, or gives up once the attempts are
    /// used up.
    fn retry(self: &Arc<Self>) {
        let mut state = self.lock_state();
        state.reconnect_timer = None;

        let retry_amount = self.options.retry_amount;
        if state.reconnect_attempts >= retry_amount {
            drop(state);

            let error = Error::unavailable(format!(
                "unable to connect after {retry_amount} attempts"
            ));
            self.report(error);
            self.teardown();
            return;
        }

        if let Some(stale) = state.socket.take() {
            stale.task.abort();
        }
        let attempt = state.reconnect_attempts + 1;
        drop(state);

        info!(
            "reconnecting to node {} (attempt {attempt} of {retry_amount})",
            self.identifier()
        );
        self.emit(Event::NodeReconnect {
            node: self.identifier().to_owned(),
        });
        self.connect();
        self.lock_state().reconnect_attempts += 1;
    }

    /// Destroys the node whether or not it is connected.
    ///
    /// The players are destroyed first, while the node is still registered
    /// and its socket still accepts messages.
    pub(crate) fn teardown(&self) {
        let manager = self.manager.upgrade();

        if let Some(manager) = &manager {
            for guild_id in manager.players_on(self.identifier()) {
                manager.command(&guild_id, Command::Destroy);
            }
        }

        let mut state = self.lock_state();
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(socket) = state.socket.take() {
            let frame = CloseFrame {
                code: CloseCode::from(CLOSE_DESTROY_CODE),
                reason: CLOSE_DESTROY_REASON.into(),
            };
            if socket.outgoing.send(Outgoing::Close(frame)).is_err() {
                socket.task.abort();
            }
        }
        state.reconnect_attempts = INITIAL_RECONNECT_ATTEMPTS;
        drop(state);

        info!("destroyed node {}", self.identifier());
        if let Some(manager) = manager {
            manager.emit(Event::NodeDestroy {
                node: self.identifier().to_owned(),
            });
            manager.remove_node(self.identifier());
        }
    }

    /// Reports an error to the manager without interrupting the connection.
    pub(crate) fn report(&self, error: Error) {
        error!("node {}: {error}", self.identifier());
        self.emit(Event::NodeError {
            node: self.identifier().to_owned(),
            error,
        });
    }

    fn emit(&self, event: Event) {
        if let Some(manager) = self.manager.upgrade() {
            manager.emit(event);
        }
    }

    fn manager(&self) -> Result<Arc<dyn Manager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| Error::cancelled("manager was dropped"))
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("identifier", &self.identifier())
            .field("address", &self.address())
            .field("connected", &self.connected())
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(socket) = state.socket.take() {
            socket.task.abort();
        }
    }
}
