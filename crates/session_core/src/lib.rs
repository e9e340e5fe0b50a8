//! Session controller for the parley chat client.
//!
//! Owns the in-memory [`Session`], orchestrates the remote HTTP API and the
//! optional live-update channel, and broadcasts every resulting state
//! snapshot to the presentational layer.

use std::sync::Arc;

use reqwest::Client;
use shared::{
    domain::{ChatId, Language, Message, MessageId, UserId},
    protocol::{
        AckResponse, ChatResponse, LiveServerEvent, LoginRequest, LoginResponse, MyChatsResponse,
        SendMessageRequest, SignupRequest, SignupResponse,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};
use url::Url;

pub mod config;
pub mod error;
pub mod live;
pub mod session;

pub use config::ClientConfig;
pub use error::SessionError;
pub use session::{CreateUserOutcome, Phase, Session, Transition};

use live::{LiveChannelConnector, LiveChannelParams, LiveChannelSession, MissingLiveChannel};

const CONTROLLER_EVENT_BUFFER: usize = 256;

/// Events broadcast to the presentational layer.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// Emitted after every applied transition with the resulting snapshot.
    StateChanged(Session),
    /// A message that arrived over the live channel.
    MessageArrived(Message),
    /// Diagnostic failure notice, suitable for a toast.
    Error(String),
}

/// Fields for the admin-only create-user flow.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub is_admin: bool,
}

pub struct SessionController {
    http: Client,
    config: ClientConfig,
    live_connector: Arc<dyn LiveChannelConnector>,
    state: Mutex<Session>,
    live: Mutex<Option<ActiveLiveChannel>>,
    events: broadcast::Sender<ControllerEvent>,
}

struct ActiveLiveChannel {
    session: Arc<dyn LiveChannelSession>,
    pump: JoinHandle<()>,
}

impl SessionController {
    pub fn new(config: ClientConfig) -> Result<Arc<Self>, SessionError> {
        Self::with_live_connector(config, Arc::new(MissingLiveChannel))
    }

    pub fn with_live_connector(
        config: ClientConfig,
        live_connector: Arc<dyn LiveChannelConnector>,
    ) -> Result<Arc<Self>, SessionError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        let (events, _) = broadcast::channel(CONTROLLER_EVENT_BUFFER);
        Ok(Arc::new(Self {
            http,
            config,
            live_connector,
            state: Mutex::new(Session::default()),
            live: Mutex::new(None),
            events,
        }))
    }

    pub async fn snapshot(&self) -> Session {
        self.state.lock().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    async fn transition(&self, transition: Transition) -> Session {
        let snapshot = {
            let mut state = self.state.lock().await;
            let next = state.clone().apply(transition);
            *state = next;
            state.clone()
        };
        let _ = self
            .events
            .send(ControllerEvent::StateChanged(snapshot.clone()));
        snapshot
    }

    /// Applies a busy-raising transition unless another guarded request is
    /// already outstanding.
    async fn begin_if_idle(&self, transition: Transition) -> Result<(), SessionError> {
        let snapshot = {
            let mut state = self.state.lock().await;
            if state.busy {
                return Err(SessionError::Busy);
            }
            let next = state.clone().apply(transition);
            *state = next;
            state.clone()
        };
        let _ = self.events.send(ControllerEvent::StateChanged(snapshot));
        Ok(())
    }

    // ---- pure field setters -------------------------------------------------

    pub async fn set_language(&self, language: Language) {
        self.transition(Transition::LanguageChanged(language)).await;
    }

    pub async fn set_username_field(&self, value: impl Into<String>) {
        self.transition(Transition::UsernameFieldChanged(value.into()))
            .await;
    }

    pub async fn set_password_field(&self, value: impl Into<String>) {
        self.transition(Transition::PasswordFieldChanged(value.into()))
            .await;
    }

    pub async fn set_draft(&self, value: impl Into<String>) {
        self.transition(Transition::DraftChanged(value.into())).await;
    }

    // ---- operations ---------------------------------------------------------

    /// Logs in with the current credential fields, binds the account's chat,
    /// loads its transcript and opens the live channel when a connector is
    /// installed.
    pub async fn authenticate(self: &Arc<Self>) -> Result<(), SessionError> {
        let (username, password) = {
            let state = self.state.lock().await;
            if state.busy {
                return Err(SessionError::Busy);
            }
            (
                state.username_field.trim().to_string(),
                state.password_field.trim().to_string(),
            )
        };
        if username.is_empty() || password.is_empty() {
            self.transition(Transition::ValidationFailed).await;
            return Err(SessionError::Validation(
                "username and password must not be empty",
            ));
        }

        self.begin_if_idle(Transition::AuthStarted).await?;

        let login = match self.login_request(&username, &password).await {
            Ok(login) => login,
            Err(err) => {
                warn!("login request failed: {err}");
                self.transition(Transition::AuthRejected).await;
                return Err(err);
            }
        };
        if !login.success {
            info!(username = %username, "login rejected");
            self.transition(Transition::AuthRejected).await;
            return Err(SessionError::Auth);
        }
        let (account, token) = match (login.user, login.token) {
            (Some(account), Some(token)) => (account, token),
            _ => {
                warn!("login succeeded without user or token payload");
                self.transition(Transition::AuthRejected).await;
                return Err(SessionError::ServerLogic("login"));
            }
        };

        info!(username = %account.username, is_admin = account.is_admin, "logged in");
        self.transition(Transition::AuthAccepted {
            username: account.username,
            token,
            is_admin: account.is_admin,
        })
        .await;

        let chat_id = match self.bind_first_chat().await {
            Ok(chat_id) => chat_id,
            Err(err) => {
                warn!("chat binding failed after login: {err}");
                self.transition(Transition::OperationFailed).await;
                return Err(err);
            }
        };

        if let Err(err) = self.reload_transcript(&chat_id).await {
            warn!(chat_id = %chat_id, "transcript load failed: {err}");
            self.transition(Transition::OperationFailed).await;
            return Err(err);
        }

        self.open_live_channel(&chat_id).await;
        Ok(())
    }

    /// Sends the current draft. Blank drafts are a local no-op; while the
    /// live channel is active the send goes over it with an optimistic
    /// transcript entry, otherwise over HTTP followed by a transcript
    /// refresh.
    pub async fn send_message(&self) -> Result<(), SessionError> {
        let (text, chat_id, live_active, sender_name) = {
            let state = self.state.lock().await;
            let text = state.draft.trim().to_string();
            if text.is_empty() {
                return Ok(());
            }
            let chat_id = state.chat_id.clone().ok_or(SessionError::NotAuthenticated)?;
            let sender_name = state
                .current_username
                .clone()
                .ok_or(SessionError::NotAuthenticated)?;
            (text, chat_id, state.live_active, sender_name)
        };

        if live_active {
            self.send_over_live_channel(&chat_id, &text, sender_name)
                .await
        } else {
            self.send_over_http(&chat_id, &text).await
        }
    }

    async fn send_over_live_channel(
        &self,
        chat_id: &ChatId,
        text: &str,
        sender_name: String,
    ) -> Result<(), SessionError> {
        let correlation_id = MessageId::correlation();
        let optimistic = Message {
            id: correlation_id.clone(),
            sender_name,
            text: text.to_string(),
            sent_at: None,
        };
        self.begin_if_idle(Transition::SendStarted {
            optimistic: Some(optimistic),
        })
        .await?;

        let session = {
            let live = self.live.lock().await;
            live.as_ref().map(|active| Arc::clone(&active.session))
        };
        let Some(session) = session else {
            self.transition(Transition::SendRejected {
                rollback: Some(correlation_id),
            })
            .await;
            self.drop_live_channel().await;
            return Err(SessionError::Channel("live channel not connected".into()));
        };

        match session.emit_send(chat_id, text).await {
            Ok(true) => {
                // The pushed echo supplies the server copy; no refetch here.
                self.transition(Transition::SendAcknowledged).await;
                Ok(())
            }
            Ok(false) => {
                warn!(chat_id = %chat_id, "send-message not acknowledged");
                self.transition(Transition::SendRejected {
                    rollback: Some(correlation_id),
                })
                .await;
                Err(SessionError::ServerLogic("send-message"))
            }
            Err(err) => {
                // The channel cannot be trusted after a failed or
                // unacknowledged emit; later sends go over HTTP.
                warn!(chat_id = %chat_id, "live send failed, dropping live channel: {err}");
                self.transition(Transition::SendRejected {
                    rollback: Some(correlation_id),
                })
                .await;
                self.drop_live_channel().await;
                Err(SessionError::Channel(err.to_string()))
            }
        }
    }

    async fn send_over_http(&self, chat_id: &ChatId, text: &str) -> Result<(), SessionError> {
        self.begin_if_idle(Transition::SendStarted { optimistic: None })
            .await?;

        if let Err(err) = self.post_message(chat_id, text).await {
            warn!(chat_id = %chat_id, "send failed: {err}");
            self.transition(Transition::SendRejected { rollback: None })
                .await;
            return Err(err);
        }
        self.transition(Transition::SendAcknowledged).await;

        // Confirmed over plain HTTP: refresh so the server copy and its id land.
        if let Err(err) = self.reload_transcript(chat_id).await {
            warn!(chat_id = %chat_id, "transcript refresh after send failed: {err}");
            let _ = self.events.send(ControllerEvent::Error(format!(
                "message sent but transcript refresh failed: {err}"
            )));
            self.transition(Transition::ReceiveFailed).await;
        }
        Ok(())
    }

    /// Clears the session unconditionally; the server round trip only
    /// determines the returned result.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let token = { self.state.lock().await.auth_token.clone() };

        self.drop_live_channel().await;

        let result = match token {
            Some(token) => self.logout_request(&token).await,
            None => Ok(()),
        };
        if let Err(err) = &result {
            warn!("logout round trip failed: {err}");
        }

        self.transition(Transition::LoggedOut).await;
        result
    }

    /// Admin-only: creates an account, then adds it to the current chat.
    /// Guard failures surface as errors; the signup attempt itself always
    /// resolves to a recorded [`CreateUserOutcome`].
    pub async fn create_user(&self, new_user: NewUser) -> Result<CreateUserOutcome, SessionError> {
        let chat_id = {
            let state = self.state.lock().await;
            if !state.authenticated {
                return Err(SessionError::NotAuthenticated);
            }
            if !state.is_admin {
                return Err(SessionError::AdminRequired);
            }
            state.chat_id.clone()
        };
        if new_user.username.trim().is_empty() || new_user.password.trim().is_empty() {
            self.transition(Transition::ValidationFailed).await;
            return Err(SessionError::Validation(
                "new user credentials must not be empty",
            ));
        }

        self.begin_if_idle(Transition::SignupStarted).await?;

        let username = new_user.username.clone();
        let outcome = match self.signup_request(&new_user).await {
            Ok(Some(user_id)) => match &chat_id {
                Some(chat_id) => match self.join_chat(chat_id, &user_id).await {
                    Ok(true) => CreateUserOutcome::CreatedAndJoined { username },
                    Ok(false) => {
                        warn!(chat_id = %chat_id, user_id = %user_id, "chat join rejected");
                        CreateUserOutcome::CreatedNotJoined { username }
                    }
                    Err(err) => {
                        warn!(chat_id = %chat_id, user_id = %user_id, "chat join failed: {err}");
                        CreateUserOutcome::CreatedNotJoined { username }
                    }
                },
                None => CreateUserOutcome::CreatedNotJoined { username },
            },
            Ok(None) => {
                info!(username = %username, "signup rejected");
                CreateUserOutcome::NotCreated { username }
            }
            Err(err) => {
                warn!(username = %username, "signup request failed: {err}");
                CreateUserOutcome::NotCreated { username }
            }
        };

        self.transition(Transition::SignupFinished(outcome.clone()))
            .await;
        Ok(outcome)
    }

    // ---- HTTP collaborator --------------------------------------------------

    fn endpoint(&self, path: &str) -> Result<Url, SessionError> {
        Ok(self.config.endpoint(path)?)
    }

    async fn bearer_token(&self) -> Result<String, SessionError> {
        self.state
            .lock()
            .await
            .auth_token
            .clone()
            .ok_or(SessionError::NotAuthenticated)
    }

    async fn login_request(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, SessionError> {
        let response = self
            .http
            .post(self.endpoint("login")?)
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn logout_request(&self, token: &str) -> Result<(), SessionError> {
        let ack: AckResponse = self
            .http
            .get(self.endpoint("logout")?)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !ack.success {
            return Err(SessionError::ServerLogic("logout"));
        }
        Ok(())
    }

    /// Resolves the chat this session is bound to. The account's first chat
    /// wins when it belongs to several.
    async fn bind_first_chat(&self) -> Result<ChatId, SessionError> {
        let token = self.bearer_token().await?;
        let chats: MyChatsResponse = self
            .http
            .get(self.endpoint("chats/my")?)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !chats.success {
            return Err(SessionError::ServerLogic("chats/my"));
        }
        let Some(chat) = chats.chats.into_iter().next() else {
            return Err(SessionError::NoChatAvailable);
        };
        self.transition(Transition::ChatBound(chat.id.clone())).await;
        Ok(chat.id)
    }

    async fn reload_transcript(&self, chat_id: &ChatId) -> Result<(), SessionError> {
        let token = self.bearer_token().await?;
        let response: ChatResponse = self
            .http
            .get(self.endpoint(&format!("chats/{chat_id}"))?)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !response.success {
            return Err(SessionError::ServerLogic("chat load"));
        }
        let messages: Vec<Message> = response
            .chat
            .map(|chat| chat.messages)
            .unwrap_or_default()
            .into_iter()
            .map(Message::from)
            .collect();
        self.transition(Transition::TranscriptReplaced(messages))
            .await;
        Ok(())
    }

    async fn post_message(&self, chat_id: &ChatId, content: &str) -> Result<(), SessionError> {
        let token = self.bearer_token().await?;
        let ack: AckResponse = self
            .http
            .post(self.endpoint(&format!("chats/{chat_id}"))?)
            .bearer_auth(token)
            .json(&SendMessageRequest {
                content: content.to_string(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !ack.success {
            return Err(SessionError::ServerLogic("send message"));
        }
        Ok(())
    }

    async fn signup_request(&self, new_user: &NewUser) -> Result<Option<UserId>, SessionError> {
        let token = self.bearer_token().await?;
        let response: SignupResponse = self
            .http
            .post(self.endpoint("signup")?)
            .bearer_auth(token)
            .json(&SignupRequest {
                username: new_user.username.clone(),
                password: new_user.password.clone(),
                is_admin: new_user.is_admin,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !response.success {
            return Ok(None);
        }
        Ok(response.user.map(|user| user.id))
    }

    async fn join_chat(&self, chat_id: &ChatId, user_id: &UserId) -> Result<bool, SessionError> {
        let token = self.bearer_token().await?;
        let ack: AckResponse = self
            .http
            .get(self.endpoint(&format!("chats/{chat_id}/join/{user_id}"))?)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(ack.success)
    }

    // ---- live channel -------------------------------------------------------

    /// Tears down the active live channel, if any; subsequent sends fall
    /// back to plain HTTP.
    async fn drop_live_channel(&self) {
        let active = { self.live.lock().await.take() };
        if let Some(active) = active {
            if let Err(err) = active.session.close().await {
                warn!("live channel close failed: {err}");
            }
            active.pump.abort();
        }
        self.transition(Transition::LiveClosed).await;
    }

    /// Best-effort: a missing or failing push endpoint leaves the session in
    /// request/response mode.
    async fn open_live_channel(self: &Arc<Self>, chat_id: &ChatId) {
        let token = match self.state.lock().await.auth_token.clone() {
            Some(token) => token,
            None => return,
        };
        let url = match self.config.live_url() {
            Ok(url) => url,
            Err(err) => {
                warn!("live channel url could not be derived: {err}");
                return;
            }
        };
        let params = LiveChannelParams {
            url,
            token,
            chat_id: chat_id.clone(),
            ack_timeout: self.config.request_timeout,
        };

        match self.live_connector.connect(params).await {
            Ok(session) => {
                let pump = self.spawn_live_pump(Arc::clone(&session));
                if let Err(err) = session.mount_chat(chat_id).await {
                    warn!(chat_id = %chat_id, "chat mount failed, dropping live channel: {err}");
                    pump.abort();
                    return;
                }
                info!(chat_id = %chat_id, "live channel opened");
                let previous = self
                    .live
                    .lock()
                    .await
                    .replace(ActiveLiveChannel { session, pump });
                if let Some(previous) = previous {
                    previous.pump.abort();
                }
                self.transition(Transition::LiveOpened).await;
            }
            Err(err) => {
                info!("live channel unavailable, staying in request/response mode: {err}");
            }
        }
    }

    fn spawn_live_pump(self: &Arc<Self>, session: Arc<dyn LiveChannelSession>) -> JoinHandle<()> {
        let mut events = session.subscribe_events();
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LiveServerEvent::NewMessage { success, message }) => {
                        if !success {
                            warn!("live push flagged failure");
                            let _ = controller
                                .events
                                .send(ControllerEvent::Error("live push flagged failure".into()));
                            controller.transition(Transition::ReceiveFailed).await;
                            continue;
                        }
                        let message = Message::from(message);
                        controller
                            .transition(Transition::MessageArrived(message.clone()))
                            .await;
                        let _ = controller
                            .events
                            .send(ControllerEvent::MessageArrived(message));
                    }
                    Ok(LiveServerEvent::SendAck { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!("live pump lagged by {count} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            controller.transition(Transition::LiveClosed).await;
        })
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
