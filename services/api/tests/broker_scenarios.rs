//! End-to-end broker behaviour over the in-memory store, with unbounded
//! channels standing in for sockets.

mod common;

use api_lib::sweeper::SessionSweeper;
use chat_core::{
    BrokerConfig, BrokerEvent, ChatError, CreateRoomRequest, DeviceDetails, MemberRole,
    MessageType, RoomType, ServiceAction, SessionContext,
};
use common::{broker, drain, login, register};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn global_room(broker: &chat_core::ChatBroker, user: &common::TestUser) -> Uuid {
    let rooms = broker.accessible_rooms(&user.ctx).await.unwrap();
    assert!(rooms[0].room.is_global);
    rooms[0].room.id
}

async fn group(broker: &chat_core::ChatBroker, owner: &common::TestUser, name: &str, members: Vec<Uuid>) -> Uuid {
    broker
        .create_room(
            &owner.ctx,
            CreateRoomRequest {
                room_type: RoomType::Group,
                name: Some(name.to_string()),
                description: None,
                member_ids: members,
            },
        )
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn sent_messages_come_back_in_order_with_ascending_ids() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let global = global_room(&broker, &alice).await;

    let first = broker
        .send_message(&alice.ctx, global, "  first  ", None, None)
        .await
        .unwrap();
    let second = broker
        .send_message(&alice.ctx, global, "second", Some(first.id), None)
        .await
        .unwrap();
    assert!(second.id > first.id);
    assert_eq!(first.content, "first");

    let history = broker.get_messages(&alice.ctx, global, 50, None).await.unwrap();
    let ids: Vec<i64> = history.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert_eq!(history[1].reply_to_message_id, Some(first.id));

    let older = broker
        .get_messages(&alice.ctx, global, 50, Some(second.id))
        .await
        .unwrap();
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].id, first.id);
}

#[tokio::test]
async fn empty_content_is_rejected() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let global = global_room(&broker, &alice).await;

    let err = broker
        .send_message(&alice.ctx, global, "   ", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn repeated_edits_show_latest_content_and_keep_history() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let global = global_room(&broker, &alice).await;
    let message = broker
        .send_message(&alice.ctx, global, "draft", None, None)
        .await
        .unwrap();

    broker.edit_message(&alice.ctx, message.id, "better").await.unwrap();
    let edited = broker.edit_message(&alice.ctx, message.id, "final").await.unwrap();
    assert_eq!(edited.id, message.id);
    assert!(edited.is_edited());

    let history = broker.get_messages(&alice.ctx, global, 50, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "final");

    let edits = broker.message_edit_history(&alice.ctx, message.id).await.unwrap();
    let contents: Vec<&str> = edits.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["better", "final"]);
}

#[tokio::test]
async fn only_the_sender_may_edit() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;
    let global = global_room(&broker, &alice).await;
    let message = broker
        .send_message(&alice.ctx, global, "mine", None, None)
        .await
        .unwrap();

    let err = broker.edit_message(&bob.ctx, message.id, "yours").await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));
    let err = broker.delete_message(&bob.ctx, message.id).await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));
}

#[tokio::test]
async fn deleted_messages_disappear_and_cannot_be_touched_again() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let global = global_room(&broker, &alice).await;
    let kept = broker
        .send_message(&alice.ctx, global, "keep me", None, None)
        .await
        .unwrap();
    let doomed = broker
        .send_message(&alice.ctx, global, "M", None, None)
        .await
        .unwrap();

    broker.delete_message(&alice.ctx, doomed.id).await.unwrap();

    let history = broker.get_messages(&alice.ctx, global, 50, None).await.unwrap();
    assert_eq!(history.iter().map(|m| m.id).collect::<Vec<_>>(), vec![kept.id]);

    let again = broker.delete_message(&alice.ctx, doomed.id).await.unwrap_err();
    assert!(again.to_string().contains("already deleted"));
    let edit = broker.edit_message(&alice.ctx, doomed.id, "revived").await.unwrap_err();
    assert!(edit.to_string().contains("already deleted"));

    let reply = broker
        .send_message(&alice.ctx, global, "re", Some(doomed.id), None)
        .await
        .unwrap_err();
    assert!(matches!(reply, ChatError::Validation(_)));
}

#[tokio::test]
async fn outsiders_cannot_read_or_write_a_group() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let eve = register(&broker, "eve").await;
    let room = group(&broker, &alice, "Private", vec![]).await;

    let send = broker
        .send_message(&eve.ctx, room, "let me in", None, None)
        .await
        .unwrap_err();
    assert!(matches!(send, ChatError::Forbidden(_)));
    let read = broker.get_messages(&eve.ctx, room, 50, None).await.unwrap_err();
    assert!(matches!(read, ChatError::Forbidden(_)));
}

#[tokio::test]
async fn blocking_stops_direct_messages_until_unblocked() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;
    let direct = broker
        .create_room(
            &alice.ctx,
            CreateRoomRequest {
                room_type: RoomType::Direct,
                name: None,
                description: None,
                member_ids: vec![bob.id()],
            },
        )
        .await
        .unwrap();

    broker.block_user(&alice.ctx, bob.id()).await.unwrap();
    let err = broker
        .send_message(&bob.ctx, direct.id, "hello?", None, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("blocked"));

    broker.unblock_user(&alice.ctx, bob.id()).await.unwrap();
    broker
        .send_message(&bob.ctx, direct.id, "hello again", None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn opening_a_direct_room_twice_reuses_it() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;
    let request = |other| CreateRoomRequest {
        room_type: RoomType::Direct,
        name: None,
        description: None,
        member_ids: vec![other],
    };

    let first = broker.create_room(&alice.ctx, request(bob.id())).await.unwrap();
    let second = broker.create_room(&bob.ctx, request(alice.id())).await.unwrap();
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn revoking_one_session_leaves_the_other_working() {
    let broker = broker();
    let s1 = register(&broker, "alice").await;
    let s2 = login(&broker, "alice", "phone").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _guard = broker.connect(&s2.ctx, tx).await;

    broker.revoke_session(&s1.ctx, s2.ctx.session_id).await.unwrap();

    let events = drain(&mut rx);
    assert!(events.contains(&BrokerEvent::SessionRevoked {
        session_id: s2.ctx.session_id
    }));
    assert!(matches!(
        broker.authenticate(s2.token()).await,
        Err(ChatError::InvalidToken)
    ));

    broker.authenticate(s1.token()).await.unwrap();
    let sessions = broker.active_sessions(&s1.ctx).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, s1.ctx.session_id);
    broker.accessible_rooms(&s1.ctx).await.unwrap();
}

#[tokio::test]
async fn expired_tokens_fail_closed() {
    let broker = common::expiring_broker();
    let auth = broker
        .register("alice", common::PASSWORD, DeviceDetails::default())
        .await
        .unwrap();

    assert!(matches!(
        broker.authenticate(&auth.session.token).await,
        Err(ChatError::Expired)
    ));
    assert!(matches!(
        broker.authenticate("no-such-token").await,
        Err(ChatError::InvalidToken)
    ));
}

#[tokio::test]
async fn validating_a_token_slides_its_expiry_forward() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let issued = alice.auth.session.expires_at;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let ctx = broker.authenticate(alice.token()).await.unwrap();
    assert!(ctx.expires_at > issued);

    let sessions = broker.active_sessions(&ctx).await.unwrap();
    let session = sessions.iter().find(|s| s.id == ctx.session_id).unwrap();
    assert_eq!(session.expires_at, ctx.expires_at);
    assert!(session.expires_at >= session.last_activity_at);
    assert_eq!(
        session.expires_at - session.last_activity_at,
        BrokerConfig::default().session_lifetime
    );
}

#[tokio::test]
async fn sweeping_expired_sessions_logs_their_sockets_out() {
    let broker = common::expiring_broker();
    let auth = broker
        .register("alice", common::PASSWORD, DeviceDetails::default())
        .await
        .unwrap();
    let ctx = SessionContext {
        user_id: auth.user.id,
        session_id: auth.session.id,
        expires_at: auth.session.expires_at,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _guard = broker.connect(&ctx, tx).await;

    assert_eq!(broker.sweep_expired_sessions().await.unwrap(), 1);
    assert!(drain(&mut rx).contains(&BrokerEvent::SessionRevoked {
        session_id: auth.session.id
    }));
    assert!(matches!(
        broker.authenticate(&auth.session.token).await,
        Err(ChatError::InvalidToken)
    ));
    assert_eq!(broker.sweep_expired_sessions().await.unwrap(), 0);
}

#[tokio::test]
async fn the_background_sweeper_revokes_until_cancelled() {
    let broker = common::expiring_broker();
    let auth = broker
        .register("alice", common::PASSWORD, DeviceDetails::default())
        .await
        .unwrap();
    let ctx = SessionContext {
        user_id: auth.user.id,
        session_id: auth.session.id,
        expires_at: auth.session.expires_at,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _guard = broker.connect(&ctx, tx).await;

    let shutdown = CancellationToken::new();
    let handle = SessionSweeper::new(broker.clone(), std::time::Duration::from_millis(20))
        .spawn(shutdown.clone());

    let revoked = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while let Some(event) = rx.recv().await {
            if let BrokerEvent::SessionRevoked { session_id } = event {
                return Some(session_id);
            }
        }
        None
    })
    .await
    .unwrap();
    assert_eq!(revoked, Some(auth.session.id));

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn the_current_session_cannot_revoke_itself() {
    let broker = broker();
    let alice = register(&broker, "alice").await;

    let err = broker
        .revoke_session(&alice.ctx, alice.ctx.session_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn revoke_all_keeps_only_the_caller() {
    let broker = broker();
    let desk = register(&broker, "alice").await;
    let _phone = login(&broker, "alice", "phone").await;
    let _tablet = login(&broker, "alice", "tablet").await;

    assert_eq!(broker.revoke_all_sessions(&desk.ctx).await.unwrap(), 2);
    assert_eq!(broker.active_sessions(&desk.ctx).await.unwrap().len(), 1);
}

#[tokio::test]
async fn leaving_and_rejoining_reuses_the_membership_row() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;
    let room = group(&broker, &alice, "Team", vec![bob.id()]).await;

    let member_id = |members: Vec<(chat_core::RoomMember, chat_core::User)>| {
        members
            .into_iter()
            .find(|(_, user)| user.username == "bob")
            .map(|(member, _)| member.id)
    };
    let original = member_id(broker.room_members(&alice.ctx, room).await.unwrap()).unwrap();

    for round in 0..3 {
        broker.leave_room(&bob.ctx, room).await.unwrap();
        assert!(matches!(
            broker.send_message(&bob.ctx, room, "gone", None, None).await,
            Err(ChatError::Forbidden(_))
        ));

        broker.join_room(&bob.ctx, room).await.unwrap();
        broker
            .send_message(&bob.ctx, room, &format!("back {round}"), None, None)
            .await
            .unwrap();

        let current = member_id(broker.room_members(&alice.ctx, room).await.unwrap());
        assert_eq!(current, Some(original));
    }
}

#[tokio::test]
async fn group_history_starts_with_the_join_notice() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;

    let team = group(&broker, &alice, "Team", vec![]).await;
    assert_eq!(broker.add_room_members(&alice.ctx, team, &[bob.id()]).await.unwrap(), 1);
    broker.send_message(&bob.ctx, team, "hi", None, None).await.unwrap();

    let history = broker.get_messages(&alice.ctx, team, 50, None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].message_type, MessageType::Service);
    assert_eq!(history[0].service_action, Some(ServiceAction::UserJoined));
    assert_eq!(history[1].message_type, MessageType::Text);
    assert_eq!(history[1].content, "hi");
    assert_eq!(history[1].sender_user_id, Some(bob.id()));
    assert!(history[0].id < history[1].id);
}

#[tokio::test]
async fn members_and_sender_session_are_notified_on_send() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;
    let eve = register(&broker, "eve").await;
    let team = group(&broker, &alice, "Team", vec![bob.id()]).await;

    let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
    let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
    let (eve_tx, mut eve_rx) = mpsc::unbounded_channel();
    let _a = broker.connect(&alice.ctx, alice_tx).await;
    let _b = broker.connect(&bob.ctx, bob_tx).await;
    let _e = broker.connect(&eve.ctx, eve_tx).await;

    let sent = broker
        .send_message(&alice.ctx, team, "standup?", None, Some("tmp-1".into()))
        .await
        .unwrap();

    let alice_events = drain(&mut alice_rx);
    assert!(alice_events.contains(&BrokerEvent::MessageReceived(sent.clone())));
    assert!(alice_events.iter().any(|e| matches!(
        e,
        BrokerEvent::MessageAck { client_message_id: Some(id), server_message_id, .. }
            if id == "tmp-1" && *server_message_id == sent.id
    )));

    let bob_events = drain(&mut bob_rx);
    assert!(bob_events.contains(&BrokerEvent::MessageReceived(sent)));
    assert!(!bob_events
        .iter()
        .any(|e| matches!(e, BrokerEvent::MessageAck { .. })));

    assert!(drain(&mut eve_rx)
        .iter()
        .all(|e| !matches!(e, BrokerEvent::MessageReceived(_))));
}

#[tokio::test]
async fn edits_and_deletes_are_broadcast_to_members() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;
    let team = group(&broker, &alice, "Team", vec![bob.id()]).await;
    let message = broker
        .send_message(&alice.ctx, team, "typo", None, None)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _guard = broker.connect(&bob.ctx, tx).await;

    broker.edit_message(&alice.ctx, message.id, "fixed").await.unwrap();
    broker.delete_message(&alice.ctx, message.id).await.unwrap();

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        BrokerEvent::MessageEdited { message_id, new_content, .. }
            if *message_id == message.id && new_content == "fixed"
    )));
    assert!(events.contains(&BrokerEvent::MessageDeleted {
        room_id: team,
        message_id: message.id
    }));
}

#[tokio::test]
async fn removed_members_are_told_they_left() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;
    let team = group(&broker, &alice, "Team", vec![bob.id()]).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _guard = broker.connect(&bob.ctx, tx).await;

    assert_eq!(
        broker.remove_room_members(&alice.ctx, team, &[bob.id()]).await.unwrap(),
        1
    );
    assert!(drain(&mut rx).contains(&BrokerEvent::RoomLeft { room_id: team }));
    assert!(matches!(
        broker.get_messages(&bob.ctx, team, 50, None).await,
        Err(ChatError::Forbidden(_))
    ));
}

#[tokio::test]
async fn ownership_moves_atomically() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;
    let team = group(&broker, &alice, "Team", vec![bob.id()]).await;

    let err = broker.leave_room(&alice.ctx, team).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    broker.transfer_ownership(&alice.ctx, team, bob.id()).await.unwrap();
    let roles: Vec<(String, MemberRole)> = broker
        .room_members(&bob.ctx, team)
        .await
        .unwrap()
        .into_iter()
        .map(|(member, user)| (user.username, member.role))
        .collect();
    assert!(roles.contains(&("alice".to_string(), MemberRole::Admin)));
    assert!(roles.contains(&("bob".to_string(), MemberRole::Owner)));
    assert_eq!(roles.iter().filter(|(_, r)| *r == MemberRole::Owner).count(), 1);

    broker.leave_room(&alice.ctx, team).await.unwrap();
}

#[tokio::test]
async fn deleting_a_room_notifies_former_members() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;
    let team = group(&broker, &alice, "Team", vec![bob.id()]).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _guard = broker.connect(&bob.ctx, tx).await;

    let err = broker.delete_room(&bob.ctx, team).await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));

    broker.delete_room(&alice.ctx, team).await.unwrap();
    assert!(drain(&mut rx).contains(&BrokerEvent::RoomDeleted { room_id: team }));
    assert!(matches!(
        broker.get_messages(&alice.ctx, team, 50, None).await,
        Err(ChatError::NotFound(_))
    ));
}

#[tokio::test]
async fn the_global_room_is_protected() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let global = global_room(&broker, &alice).await;

    assert!(broker.leave_room(&alice.ctx, global).await.is_err());
    assert!(broker.delete_room(&alice.ctx, global).await.is_err());
    let create = broker
        .create_room(
            &alice.ctx,
            CreateRoomRequest {
                room_type: RoomType::Global,
                name: Some("Another".into()),
                description: None,
                member_ids: vec![],
            },
        )
        .await;
    assert!(matches!(create, Err(ChatError::Validation(_))));
}

#[tokio::test]
async fn friend_requests_flow_and_blocks_refuse_them() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;

    broker.send_friend_request(&alice.ctx, bob.id()).await.unwrap();
    let pending = broker.pending_friend_requests(&bob.ctx).await.unwrap();
    assert_eq!(pending.iter().map(|u| u.id).collect::<Vec<_>>(), vec![alice.id()]);

    broker.respond_friend_request(&bob.ctx, alice.id(), true).await.unwrap();
    let friends = broker.friends(&alice.ctx).await.unwrap();
    assert_eq!(friends.iter().map(|u| u.id).collect::<Vec<_>>(), vec![bob.id()]);

    broker.block_user(&bob.ctx, alice.id()).await.unwrap();
    assert!(broker.friends(&alice.ctx).await.unwrap().is_empty());
    let refused = broker.send_friend_request(&alice.ctx, bob.id()).await.unwrap_err();
    assert!(matches!(refused, ChatError::Forbidden(_)));
    assert_eq!(broker.blocked_users(&bob.ctx).await.unwrap().len(), 1);
}

#[tokio::test]
async fn presence_follows_the_last_connection() {
    let broker = broker();
    let alice = register(&broker, "alice").await;
    let bob = register(&broker, "bob").await;

    let (tx1, _rx1) = mpsc::unbounded_channel();
    let (tx2, _rx2) = mpsc::unbounded_channel();
    let first = broker.connect(&alice.ctx, tx1).await;
    let second = broker.connect(&alice.ctx, tx2).await;
    assert!(broker.get_user(&bob.ctx, alice.id()).await.unwrap().is_online);

    broker.disconnect(first).await;
    assert!(broker.get_user(&bob.ctx, alice.id()).await.unwrap().is_online);

    broker.disconnect(second).await;
    let offline = broker.get_user(&bob.ctx, alice.id()).await.unwrap();
    assert!(!offline.is_online);
    assert!(offline.last_seen_at.is_some());
}

#[tokio::test]
async fn logins_are_case_insensitive_and_do_not_leak_which_part_failed() {
    let broker = broker();
    register(&broker, "Alice").await;

    let taken = broker
        .register("alice", common::PASSWORD, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(taken, ChatError::Conflict(_)));

    let wrong_password = broker
        .login("alice", "not the password", Default::default())
        .await
        .unwrap_err();
    let no_such_user = broker
        .login("mallory", common::PASSWORD, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(wrong_password, ChatError::InvalidCredentials));
    assert!(matches!(no_such_user, ChatError::InvalidCredentials));
}
