use super::*;
use shared::domain::{ChatId, Language, Message, MessageId};

fn message(id: &str, sender: &str, text: &str) -> Message {
    Message {
        id: MessageId::from(id),
        sender_name: sender.to_string(),
        text: text.to_string(),
        sent_at: None,
    }
}

fn authenticated_session() -> Session {
    Session::default()
        .apply(Transition::AuthStarted)
        .apply(Transition::AuthAccepted {
            username: "alice".to_string(),
            token: "T1".to_string(),
            is_admin: false,
        })
        .apply(Transition::ChatBound(ChatId::from("C1")))
        .apply(Transition::TranscriptReplaced(vec![message(
            "M1", "bob", "hi",
        )]))
}

#[test]
fn default_session_is_unauthenticated_and_idle() {
    let session = Session::default();
    assert_eq!(session.phase(), Phase::Unauthenticated);
    assert_eq!(session.language, Language::Ru);
    assert!(!session.busy);
    assert!(!session.error);
    assert!(session.transcript.is_empty());
}

#[test]
fn login_sequence_reaches_active_phase() {
    let session = authenticated_session();
    assert!(session.authenticated);
    assert_eq!(session.phase(), Phase::Active);
    assert_eq!(session.current_username.as_deref(), Some("alice"));
    assert_eq!(session.auth_token.as_deref(), Some("T1"));
    assert_eq!(session.chat_id, Some(ChatId::from("C1")));
    assert_eq!(session.transcript.len(), 1);
    assert!(!session.busy);
    assert!(!session.error);
}

#[test]
fn chat_view_is_gated_until_transcript_loads() {
    let session = Session::default()
        .apply(Transition::AuthStarted)
        .apply(Transition::AuthAccepted {
            username: "alice".to_string(),
            token: "T1".to_string(),
            is_admin: false,
        });
    assert_eq!(session.phase(), Phase::Loading);
    assert!(session.busy);
}

#[test]
fn rejected_login_sets_error_and_releases_busy() {
    let session = Session::default()
        .apply(Transition::AuthStarted)
        .apply(Transition::AuthRejected);
    assert_eq!(session.phase(), Phase::Unauthenticated);
    assert!(session.error);
    assert!(!session.busy);
    assert!(session.auth_token.is_none());
}

#[test]
fn logout_clears_the_authenticated_session() {
    let session = authenticated_session()
        .apply(Transition::DraftChanged("half-typed".to_string()))
        .apply(Transition::LoggedOut);
    assert_eq!(session.phase(), Phase::Unauthenticated);
    assert!(session.auth_token.is_none());
    assert!(session.chat_id.is_none());
    assert!(session.transcript.is_empty());
    assert!(!session.transcript_loaded);
    assert!(session.draft.is_empty());
    assert!(!session.busy);
    assert!(!session.error);
}

#[test]
fn arrivals_prepend_newest_first() {
    let session = authenticated_session()
        .apply(Transition::MessageArrived(message("M2", "bob", "again")));
    assert_eq!(session.transcript[0].id, MessageId::from("M2"));
    assert_eq!(session.transcript[1].id, MessageId::from("M1"));
}

#[test]
fn duplicate_arrival_by_id_is_ignored() {
    let session = authenticated_session()
        .apply(Transition::MessageArrived(message("M1", "bob", "hi")))
        .apply(Transition::MessageArrived(message("M1", "bob", "hi")));
    assert_eq!(session.transcript.len(), 1);
}

#[test]
fn arrival_while_unauthenticated_is_dropped() {
    let session =
        Session::default().apply(Transition::MessageArrived(message("M9", "mallory", "boo")));
    assert!(session.transcript.is_empty());
}

#[test]
fn pushed_echo_reconciles_the_optimistic_entry() {
    let optimistic = Message {
        id: MessageId::correlation(),
        sender_name: "alice".to_string(),
        text: "hello".to_string(),
        sent_at: None,
    };
    let correlation_id = optimistic.id.clone();

    let session = authenticated_session()
        .apply(Transition::SendStarted {
            optimistic: Some(optimistic),
        })
        .apply(Transition::SendAcknowledged)
        .apply(Transition::MessageArrived(message("M7", "alice", "hello")));

    assert_eq!(session.transcript.len(), 2);
    assert_eq!(session.transcript[0].id, MessageId::from("M7"));
    assert!(session
        .transcript
        .iter()
        .all(|entry| entry.id != correlation_id));
    assert!(session.pending_echoes.is_empty());
}

#[test]
fn echo_of_the_same_text_from_another_user_still_appends() {
    let optimistic = Message {
        id: MessageId::correlation(),
        sender_name: "alice".to_string(),
        text: "hello".to_string(),
        sent_at: None,
    };

    let session = authenticated_session()
        .apply(Transition::SendStarted {
            optimistic: Some(optimistic),
        })
        .apply(Transition::MessageArrived(message("M8", "bob", "hello")));

    // bob's message must not consume alice's pending echo
    assert_eq!(session.pending_echoes.len(), 1);
    assert_eq!(session.transcript.len(), 3);
}

#[test]
fn rejected_send_rolls_back_the_optimistic_entry_and_keeps_the_draft() {
    let optimistic = Message {
        id: MessageId::correlation(),
        sender_name: "alice".to_string(),
        text: "hello".to_string(),
        sent_at: None,
    };
    let correlation_id = optimistic.id.clone();

    let session = authenticated_session()
        .apply(Transition::DraftChanged("hello".to_string()))
        .apply(Transition::SendStarted {
            optimistic: Some(optimistic),
        })
        .apply(Transition::SendRejected {
            rollback: Some(correlation_id),
        });

    assert_eq!(session.transcript.len(), 1);
    assert_eq!(session.draft, "hello");
    assert!(session.error);
    assert!(!session.busy);
    assert!(session.pending_echoes.is_empty());
}

#[test]
fn acknowledged_send_clears_the_draft() {
    let session = authenticated_session()
        .apply(Transition::DraftChanged("hello".to_string()))
        .apply(Transition::SendStarted { optimistic: None })
        .apply(Transition::SendAcknowledged);
    assert!(session.draft.is_empty());
    assert!(!session.busy);
    assert!(!session.error);
}

#[test]
fn signup_outcomes_drive_the_error_flag() {
    let created = authenticated_session().apply(Transition::SignupFinished(
        CreateUserOutcome::CreatedAndJoined {
            username: "carol".to_string(),
        },
    ));
    assert!(!created.error);

    let not_joined = authenticated_session().apply(Transition::SignupFinished(
        CreateUserOutcome::CreatedNotJoined {
            username: "carol".to_string(),
        },
    ));
    assert!(not_joined.error);
    assert!(not_joined
        .signup_outcome
        .as_ref()
        .is_some_and(CreateUserOutcome::is_failure));

    let not_created = authenticated_session().apply(Transition::SignupFinished(
        CreateUserOutcome::NotCreated {
            username: "carol".to_string(),
        },
    ));
    assert!(not_created.error);
}

#[test]
fn validation_failure_only_raises_the_error_flag() {
    let session = authenticated_session().apply(Transition::ValidationFailed);
    assert!(session.error);
    assert!(session.authenticated);
    assert_eq!(session.auth_token.as_deref(), Some("T1"));
    assert_eq!(session.transcript.len(), 1);
    assert!(!session.busy);
}

#[test]
fn field_setters_touch_only_their_field() {
    let session = Session::default()
        .apply(Transition::LanguageChanged(Language::En))
        .apply(Transition::UsernameFieldChanged("alice".to_string()))
        .apply(Transition::PasswordFieldChanged("secret".to_string()))
        .apply(Transition::DraftChanged("typing".to_string()));
    assert_eq!(session.language, Language::En);
    assert_eq!(session.username_field, "alice");
    assert_eq!(session.password_field, "secret");
    assert_eq!(session.draft, "typing");
    assert_eq!(session.phase(), Phase::Unauthenticated);
    assert!(!session.busy);
    assert!(!session.error);
}

#[test]
fn closing_the_live_channel_discards_stale_pending_echoes() {
    let optimistic = Message {
        id: MessageId::correlation(),
        sender_name: "alice".to_string(),
        text: "hello".to_string(),
        sent_at: None,
    };
    let session = authenticated_session()
        .apply(Transition::LiveOpened)
        .apply(Transition::SendStarted {
            optimistic: Some(optimistic),
        })
        .apply(Transition::SendAcknowledged)
        .apply(Transition::LiveClosed);
    assert!(!session.live_active);
    assert!(session.pending_echoes.is_empty());
}
