//! Immutable session state and its pure transition function.
//!
//! Every state change in the controller goes through [`Session::apply`], a
//! pure function from a session and a [`Transition`] to the next session.
//! The controller is the only impure layer: it talks to the network and
//! applies the resulting transitions under a lock.

use shared::domain::{ChatId, Language, Message, MessageId};

/// Coarse rendering phase derived from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unauthenticated,
    /// Logged in, but the transcript has not arrived yet; a chat view must
    /// not render in this phase.
    Loading,
    Active,
}

/// Outcome of an admin create-user attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateUserOutcome {
    CreatedAndJoined { username: String },
    CreatedNotJoined { username: String },
    NotCreated { username: String },
}

impl CreateUserOutcome {
    /// Human-readable notice for the presentational layer.
    pub fn notice(&self) -> String {
        match self {
            CreateUserOutcome::CreatedAndJoined { username } => {
                format!("user {username} created and added to the chat")
            }
            CreateUserOutcome::CreatedNotJoined { username } => {
                format!("user {username} created, but could not be added to the chat")
            }
            CreateUserOutcome::NotCreated { username } => {
                format!("user {username} could not be created")
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, CreateUserOutcome::CreatedAndJoined { .. })
    }
}

/// A locally-sent message awaiting its server echo over the live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEcho {
    pub correlation_id: MessageId,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub language: Language,
    pub username_field: String,
    pub password_field: String,
    pub draft: String,
    pub authenticated: bool,
    pub current_username: Option<String>,
    pub auth_token: Option<String>,
    pub is_admin: bool,
    pub chat_id: Option<ChatId>,
    /// Newest-first; replaced wholesale on (re)load, prepended to on arrival.
    pub transcript: Vec<Message>,
    pub transcript_loaded: bool,
    /// True exactly while a request that disables input is outstanding.
    pub busy: bool,
    pub error: bool,
    pub live_active: bool,
    pub pending_echoes: Vec<PendingEcho>,
    pub signup_outcome: Option<CreateUserOutcome>,
}

#[derive(Debug, Clone)]
pub enum Transition {
    LanguageChanged(Language),
    UsernameFieldChanged(String),
    PasswordFieldChanged(String),
    DraftChanged(String),
    AuthStarted,
    AuthAccepted {
        username: String,
        token: String,
        is_admin: bool,
    },
    AuthRejected,
    ChatBound(ChatId),
    TranscriptReplaced(Vec<Message>),
    LiveOpened,
    LiveClosed,
    SendStarted {
        /// Prepended immediately when the send goes over the live channel;
        /// the HTTP path refreshes from the server instead.
        optimistic: Option<Message>,
    },
    SendAcknowledged,
    SendRejected {
        rollback: Option<MessageId>,
    },
    MessageArrived(Message),
    ReceiveFailed,
    /// Local input validation failed; no request was made and any
    /// established session stays untouched.
    ValidationFailed,
    SignupStarted,
    SignupFinished(CreateUserOutcome),
    /// Any non-send request that failed after authentication: releases the
    /// busy flag and raises the error flag.
    OperationFailed,
    LoggedOut,
}

impl Session {
    pub fn phase(&self) -> Phase {
        if !self.authenticated {
            Phase::Unauthenticated
        } else if !self.transcript_loaded {
            Phase::Loading
        } else {
            Phase::Active
        }
    }

    /// Pure transition function; returns the next session.
    #[must_use]
    pub fn apply(mut self, transition: Transition) -> Session {
        match transition {
            Transition::LanguageChanged(language) => self.language = language,
            Transition::UsernameFieldChanged(value) => self.username_field = value,
            Transition::PasswordFieldChanged(value) => self.password_field = value,
            Transition::DraftChanged(value) => self.draft = value,
            Transition::AuthStarted | Transition::SignupStarted => self.busy = true,
            Transition::AuthAccepted {
                username,
                token,
                is_admin,
            } => {
                self.error = false;
                self.authenticated = true;
                self.current_username = Some(username);
                self.auth_token = Some(token);
                self.is_admin = is_admin;
                self.password_field.clear();
            }
            Transition::AuthRejected => {
                self.busy = false;
                self.error = true;
                self.authenticated = false;
                self.current_username = None;
                self.auth_token = None;
                self.is_admin = false;
            }
            Transition::ChatBound(chat_id) => {
                if self.authenticated {
                    self.chat_id = Some(chat_id);
                }
            }
            Transition::TranscriptReplaced(messages) => {
                if self.authenticated {
                    self.transcript = messages;
                    self.transcript_loaded = true;
                    self.busy = false;
                    self.error = false;
                }
            }
            Transition::LiveOpened => self.live_active = true,
            Transition::LiveClosed => {
                self.live_active = false;
                self.pending_echoes.clear();
            }
            Transition::SendStarted { optimistic } => {
                self.busy = true;
                if let Some(message) = optimistic {
                    self.pending_echoes.push(PendingEcho {
                        correlation_id: message.id.clone(),
                        text: message.text.clone(),
                    });
                    self.transcript.insert(0, message);
                }
            }
            Transition::SendAcknowledged => {
                self.busy = false;
                self.error = false;
                self.draft.clear();
            }
            Transition::SendRejected { rollback } => {
                self.busy = false;
                self.error = true;
                if let Some(correlation_id) = rollback {
                    self.transcript.retain(|message| message.id != correlation_id);
                    self.pending_echoes
                        .retain(|pending| pending.correlation_id != correlation_id);
                }
            }
            Transition::MessageArrived(message) => self.reconcile_arrival(message),
            Transition::ReceiveFailed | Transition::ValidationFailed => self.error = true,
            Transition::SignupFinished(outcome) => {
                self.busy = false;
                self.error = outcome.is_failure();
                self.signup_outcome = Some(outcome);
            }
            Transition::OperationFailed => {
                self.busy = false;
                self.error = true;
            }
            Transition::LoggedOut => {
                self.authenticated = false;
                self.current_username = None;
                self.auth_token = None;
                self.is_admin = false;
                self.chat_id = None;
                self.transcript.clear();
                self.transcript_loaded = false;
                self.busy = false;
                self.error = false;
                self.live_active = false;
                self.pending_echoes.clear();
                self.signup_outcome = None;
                self.draft.clear();
                self.password_field.clear();
            }
        }
        self
    }

    /// Prepends a pushed message unless it is already represented: by id, or
    /// by an optimistic entry it reconciles (server ids are authoritative).
    fn reconcile_arrival(&mut self, message: Message) {
        if !self.authenticated {
            return;
        }
        if self.transcript.iter().any(|entry| entry.id == message.id) {
            return;
        }
        let is_self_echo = self.current_username.as_deref() == Some(message.sender_name.as_str());
        let pending_pos = is_self_echo
            .then(|| {
                self.pending_echoes
                    .iter()
                    .position(|pending| pending.text == message.text)
            })
            .flatten();
        if let Some(pos) = pending_pos {
            let pending = self.pending_echoes.remove(pos);
            if let Some(entry) = self
                .transcript
                .iter_mut()
                .find(|entry| entry.id == pending.correlation_id)
            {
                *entry = message;
            } else {
                self.transcript.insert(0, message);
            }
        } else {
            self.transcript.insert(0, message);
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
