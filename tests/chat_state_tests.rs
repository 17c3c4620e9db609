// Chat state tests
// Dispatcher and composer behaviour driven through raw frames, as the server sends them

mod common;
use common::{id_created_frame, me, setup_logging, state_with_dialogs, text_frame, typing_frame};

use std::collections::HashSet;

use tokio::time::{Duration, Instant};

use privchat::chat::{ChatState, InboundEvent, Notice, OutboundFrame, DEFAULT_TYPING_TIMEOUT};
use privchat::models::{Dialog, Direction, MessageId, MessageStatus};

//------------------------------------------------------------------------------
// MESSAGE STORE INVARIANTS
//------------------------------------------------------------------------------

/// Duplicate deliveries and reconciliations never leave two records with one id
#[tokio::test]
async fn test_no_duplicate_ids_after_reconciliation() {
    let mut state = state_with_dialogs(&[("2", "bob"), ("3", "carol")]);

    state.handle_frame(&text_frame(-5, "2", "1", "one"));
    state.handle_frame(&text_frame(-5, "2", "1", "one again"));
    state.handle_frame(&text_frame(-6, "3", "1", "two"));
    state.handle_frame(&text_frame(80, "3", "1", "three"));
    state.handle_frame(&id_created_frame(-5, 81));
    // The server reassigns onto an id we already hold
    state.handle_frame(&id_created_frame(-6, 80));
    state.handle_frame(&text_frame(81, "2", "1", "one"));

    let ids: Vec<MessageId> = state.messages().all().iter().map(|m| m.id).collect();
    let unique: HashSet<MessageId> = ids.iter().copied().collect();
    assert_eq!(ids.len(), unique.len(), "duplicate ids in {:?}", ids);
    assert_eq!(state.messages().len(), 2);
    assert!(state.messages().get(MessageId::Provisional(-5)).is_none());
}

/// Reassigning an id nobody holds changes nothing
#[tokio::test]
async fn test_reassign_unknown_id_is_noop() {
    let mut state = state_with_dialogs(&[("2", "bob")]);
    state.handle_frame(&text_frame(-5, "2", "1", "hello"));
    let before = state.messages().all().to_vec();

    let effects = state.handle_frame(&id_created_frame(-999, 500));
    assert!(effects.is_empty());
    assert_eq!(state.messages().all(), before.as_slice());
}

//------------------------------------------------------------------------------
// DIALOG SELECTION
//------------------------------------------------------------------------------

#[tokio::test]
async fn test_select_is_idempotent() {
    let mut state = state_with_dialogs(&[("2", "bob"), ("3", "carol")]);
    state.select_dialog("3");
    let once = state.dialogs().all().to_vec();
    let selection = state.dialogs().selection().clone();

    let effects = state.select_dialog("3");
    assert!(effects.is_empty());
    assert_eq!(state.dialogs().all(), once.as_slice());
    assert_eq!(state.dialogs().selection(), &selection);
    assert_eq!(state.dialogs().all().iter().filter(|d| d.highlighted).count(), 1);
}

#[tokio::test]
async fn test_dialog_reload_keeps_selection_and_local_dialogs() {
    let mut state = state_with_dialogs(&[("2", "bob"), ("3", "carol")]);
    state.select_dialog("3");

    state.load_dialogs(vec![Dialog::new("3", "carol"), Dialog::new("4", "dave")]);
    assert_eq!(state.dialogs().selected_id(), Some("3"));

    state.load_dialogs(vec![Dialog::new("4", "dave")]);
    assert_eq!(state.dialogs().selected_id(), Some("3"));
    let ids: Vec<&str> = state.dialogs().all().iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "3", "4"]);
}

/// A dialog created by a message from an unknown peer survives a dialog reload
#[tokio::test]
async fn test_dialog_from_unknown_peer_survives_reload() {
    let mut state = state_with_dialogs(&[("2", "bob")]);
    state.select_dialog("2");

    state.handle_frame(&text_frame(501, "9", "1", "hi, new here"));
    assert!(state.dialogs().contains("9"));

    state.load_dialogs(vec![Dialog::new("2", "bob")]);
    let nine = state.dialogs().get("9").expect("dialog 9 kept");
    assert_eq!(nine.subtitle, "hi, new here");
    assert_eq!(state.messages().for_dialog("9").len(), 1);
    assert_eq!(state.dialogs().selected_id(), Some("2"));
}

//------------------------------------------------------------------------------
// READ ACKNOWLEDGEMENT
//------------------------------------------------------------------------------

/// Dialogs [A, B], A open, inbound message 101 arrives in A
#[tokio::test]
async fn test_inbound_message_in_open_dialog_is_acked_once() {
    let mut state = state_with_dialogs(&[("10", "A"), ("20", "B")]);
    state.select_dialog("10");

    let effects = state.handle_frame(&text_frame(101, "10", "1", "ping"));
    assert_eq!(
        effects.frames,
        vec![OutboundFrame::MessageRead { user_pk: "10".to_string(), message_id: 101 }]
    );
    assert_eq!(state.messages().get(MessageId::Server(101)).unwrap().status, MessageStatus::Read);

    // Redelivery, explicit mark and reselect produce no second ack
    assert!(state.handle_frame(&text_frame(101, "10", "1", "ping")).frames.is_empty());
    assert!(state.mark_read(101).is_empty());
    assert!(state.select_dialog("20").is_empty());
    assert!(state.select_dialog("10").is_empty());
}

/// Unread messages in a dialog are acked when it gets opened
#[tokio::test]
async fn test_selecting_dialog_sweeps_unread() {
    let mut state = state_with_dialogs(&[("10", "A"), ("20", "B")]);
    state.select_dialog("10");
    state.handle_frame(&text_frame(201, "20", "1", "first"));
    state.handle_frame(&text_frame(202, "20", "1", "second"));
    assert_eq!(state.messages().get(MessageId::Server(201)).unwrap().status, MessageStatus::Received);

    let effects = state.select_dialog("20");
    let acked: Vec<i64> = effects
        .frames
        .iter()
        .filter_map(|f| match f {
            OutboundFrame::MessageRead { message_id, .. } => Some(*message_id),
            _ => None,
        })
        .collect();
    assert_eq!(acked, vec![201, 202]);
}

//------------------------------------------------------------------------------
// OUTBOUND MESSAGES
//------------------------------------------------------------------------------

/// Send "hi" to B without selecting it, then the server assigns id 55
#[tokio::test]
async fn test_send_then_reassign_marks_sent() {
    let mut state = state_with_dialogs(&[("10", "A"), ("20", "B")]);

    let effects = state.send_text_to("20", "hi");
    assert_eq!(effects.frames.len(), 1);
    let provisional = state.messages().all()[0].clone();
    assert!(provisional.id.is_provisional());
    assert_eq!(provisional.status, MessageStatus::Waiting);
    assert_eq!(provisional.direction, Direction::Outbound);
    assert_eq!(state.dialogs().selected_id(), None);

    state.handle_event(InboundEvent::IdReassigned { old_id: provisional.id, new_id: 55 });
    let sent = state.messages().get(MessageId::Server(55)).unwrap();
    assert_eq!(sent.status, MessageStatus::Sent);
    assert!(state.messages().get(provisional.id).is_none());
    assert_eq!(state.messages().len(), 1);
}

#[tokio::test]
async fn test_own_echo_reconciles_with_optimistic_record() {
    let mut state = state_with_dialogs(&[("20", "B")]);
    state.send_text_to("20", "hi");
    let id = state.messages().all()[0].id;

    // The server echoes our message to us under the provisional id
    state.handle_frame(&text_frame(id.raw(), "1", "20", "hi"));
    assert_eq!(state.messages().len(), 1);
    assert_eq!(state.messages().get(id).unwrap().status, MessageStatus::Waiting);
}

//------------------------------------------------------------------------------
// MALFORMED INPUT
//------------------------------------------------------------------------------

#[tokio::test]
async fn test_misspelled_tag_surfaces_notice_without_mutation() {
    let mut state = state_with_dialogs(&[("2", "bob")]);
    state.select_dialog("2");
    let dialogs = state.dialogs().all().to_vec();

    let effects = state.handle_frame(r#"{"msg_typee": 5}"#);
    assert!(effects.frames.is_empty());
    assert!(matches!(effects.notices.as_slice(), [Notice::MalformedFrame(_)]));
    assert_eq!(state.dialogs().all(), dialogs.as_slice());
    assert!(state.messages().is_empty());
    assert!(state.typing().peers().is_empty());
}

#[tokio::test]
async fn test_garbage_frames_are_reported() {
    let mut state = state_with_dialogs(&[("2", "bob")]);
    for raw in ["not json", "[1, 2]", r#"{"msg_type": 42}"#, r#"{"msg_type": 3, "text": "no sender"}"#] {
        let effects = state.handle_frame(raw);
        assert_eq!(effects.notices.len(), 1, "no notice for {}", raw);
    }
    assert!(state.messages().is_empty());
}

//------------------------------------------------------------------------------
// TYPING INDICATORS
//------------------------------------------------------------------------------

/// A second notice within the window restarts it instead of stacking a second removal
#[tokio::test(start_paused = true)]
async fn test_typing_notice_resets_expiry() {
    setup_logging();
    let (mut state, mut typing_rx) = ChatState::new();
    state.set_me(me());
    let start = Instant::now();

    state.handle_frame(&typing_frame("2"));
    tokio::time::sleep(Duration::from_millis(4000)).await;
    state.handle_frame(&typing_frame("2"));
    assert_eq!(state.typing().pending_timers(), 1);

    let expired = typing_rx.recv().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(4000) + DEFAULT_TYPING_TIMEOUT);
    assert!(state.expire_typing(&expired));
    assert!(!state.typing().is_typing("2"));
    assert!(tokio::time::timeout(Duration::from_secs(60), typing_rx.recv()).await.is_err());
}

#[tokio::test]
async fn test_typing_stopped_frame_clears_peer() {
    let mut state = state_with_dialogs(&[("2", "bob")]);
    state.handle_frame(&typing_frame("2"));
    assert_eq!(state.typing().peers(), vec!["2".to_string()]);
    state.handle_frame(r#"{"msg_type": 10, "user_pk": "2"}"#);
    assert!(state.typing().peers().is_empty());
    assert_eq!(state.typing().pending_timers(), 0);
}
