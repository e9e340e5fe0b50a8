use super::*;

#[test]
fn message_payload_reads_mongo_style_id() {
    let payload: MessagePayload = serde_json::from_str(
        r#"{"_id":"M1","sender":{"username":"bob"},"content":"hi"}"#,
    )
    .expect("parse message payload");

    assert_eq!(payload.id.as_str(), "M1");
    assert_eq!(payload.sender.username, "bob");
    assert_eq!(payload.content, "hi");
    assert!(payload.sent_at.is_none());

    let message = Message::from(payload);
    assert_eq!(message.sender_name, "bob");
    assert_eq!(message.text, "hi");
}

#[test]
fn login_response_tolerates_rejection_shape() {
    let response: LoginResponse =
        serde_json::from_str(r#"{"success":false}"#).expect("parse login rejection");
    assert!(!response.success);
    assert!(response.user.is_none());
    assert!(response.token.is_none());
}

#[test]
fn signup_request_uses_camel_case_admin_flag() {
    let body = serde_json::to_value(SignupRequest {
        username: "carol".to_string(),
        password: "pw".to_string(),
        is_admin: true,
    })
    .expect("serialize signup");
    assert_eq!(body["isAdmin"], true);
}

#[test]
fn live_events_carry_original_event_names() {
    let mount = serde_json::to_value(LiveClientEvent::MountChat {
        chat_id: ChatId::from("C1"),
    })
    .expect("serialize mount-chat");
    assert_eq!(mount["event"], "mount-chat");
    assert_eq!(mount["payload"]["chatId"], "C1");

    let send = serde_json::to_value(LiveClientEvent::SendMessage {
        chat_id: ChatId::from("C1"),
        content: "hello".to_string(),
    })
    .expect("serialize send-message");
    assert_eq!(send["event"], "send-message");
    assert_eq!(send["payload"]["content"], "hello");

    let pushed: LiveServerEvent = serde_json::from_str(
        r#"{"event":"new-message","payload":{"success":true,"message":{"_id":"M2","sender":{"username":"bob"},"content":"yo"}}}"#,
    )
    .expect("parse new-message");
    match pushed {
        LiveServerEvent::NewMessage { success, message } => {
            assert!(success);
            assert_eq!(message.id.as_str(), "M2");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
