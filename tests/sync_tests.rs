// Cross-client messaging tests: public room fan-out, the contact graph,
// unread tracking, and channel clearing, with each participant on its own
// client over a shared backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TestApp;
use driftchat_core::channel::ChannelId;
use driftchat_core::store::memory::MemoryBackend;
use driftchat_core::sync::{ChannelSnapshot, SyncState};
use tokio::sync::watch;

async fn synced(rx: &mut watch::Receiver<ChannelSnapshot>) -> ChannelSnapshot {
    loop {
        rx.changed().await.unwrap();
        let snap = rx.borrow().clone();
        if snap.state == SyncState::Synced {
            return snap;
        }
    }
}

#[tokio::test]
async fn public_room_reaches_every_client() {
    let store = Arc::new(MemoryBackend::new());
    let alice = TestApp::on_store(store.clone());
    alice.register("Ada", "ada", "ada@example.com").await;
    let bob = TestApp::on_store(store.clone());
    bob.register("Grace", "grace", "grace@example.com").await;

    let alice_sync = alice.client.sync().unwrap();
    let bob_sync = bob.client.sync().unwrap();
    let mut bob_feed = bob_sync.public_feed();

    alice_sync.send_public("hello everyone").await.unwrap();

    let snap = synced(&mut bob_feed).await;
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(snap.messages[0].text, "hello everyone");
    assert_eq!(snap.messages[0].author_name, "Ada");
}

#[tokio::test]
async fn contact_lifecycle_feeds_the_sidebar() {
    let store = Arc::new(MemoryBackend::new());
    let alice = TestApp::on_store(store.clone());
    let me = alice.register("Ada", "ada", "ada@example.com").await;
    let bob = TestApp::on_store(store.clone());
    let them = bob.register("Grace", "grace", "grace@example.com").await;

    let mut feed = alice.client.contacts().list(me.id);
    assert!(feed.next().await.unwrap().is_empty());

    alice.client.contacts().add(me.id, them.id).await.unwrap();
    let listed = feed.next().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].profile.username, "grace");

    // The edge is one-directional
    let mut their_feed = bob.client.contacts().list(them.id);
    assert!(their_feed.next().await.unwrap().is_empty());

    alice.client.contacts().remove(me.id, them.id).await.unwrap();
    assert!(feed.next().await.unwrap().is_empty());
}

#[tokio::test]
async fn unread_badge_lifecycle() {
    let store = Arc::new(MemoryBackend::new());
    let alice = TestApp::on_store(store.clone());
    let me = alice.register("Ada", "ada", "ada@example.com").await;
    let bob = TestApp::on_store(store.clone());
    let them = bob.register("Grace", "grace", "grace@example.com").await;

    let alice_sync = alice.client.sync().unwrap();
    let bob_sync = bob.client.sync().unwrap();

    alice_sync.set_contacts(&[them.id]);
    let mut unread = alice_sync.unread_feed();

    // One incoming message, exactly one unread
    bob_sync.send_private("are you free?", me.id).await.unwrap();
    while alice_sync.unread_for(them.id) != 1 {
        unread.changed().await.unwrap();
    }
    assert_eq!(alice_sync.unread_for(them.id), 1);

    // Opening the chat resets to zero and stays zero while active
    alice_sync.set_active(Some(them.id));
    assert_eq!(alice_sync.unread_for(them.id), 0);

    let mut active = alice_sync.active_feed();
    bob_sync.send_private("lunch?", me.id).await.unwrap();
    let snap = loop {
        let snap = synced(&mut active).await;
        if snap.messages.len() == 2 {
            break snap;
        }
    };
    assert_eq!(snap.messages[1].text, "lunch?");
    assert_eq!(alice_sync.unread_for(them.id), 0);

    // Switching away re-arms the counter
    alice_sync.set_active(None);
    bob_sync.send_private("hello?", me.id).await.unwrap();
    while alice_sync.unread_for(them.id) != 1 {
        unread.changed().await.unwrap();
    }
    assert_eq!(alice_sync.unread_for(them.id), 1);
}

#[tokio::test]
async fn private_channel_is_isolated_per_pair() {
    let store = Arc::new(MemoryBackend::new());
    let alice = TestApp::on_store(store.clone());
    let _me = alice.register("Ada", "ada", "ada@example.com").await;
    let bob = TestApp::on_store(store.clone());
    let them = bob.register("Grace", "grace", "grace@example.com").await;
    let carol = TestApp::on_store(store.clone());
    let other = carol.register("Carol", "carol", "carol@example.com").await;

    let alice_sync = alice.client.sync().unwrap();
    alice_sync.send_private("for grace", them.id).await.unwrap();
    alice_sync.send_private("for carol", other.id).await.unwrap();

    alice_sync.set_active(Some(them.id));
    let mut feed = alice_sync.active_feed();
    let snap = synced(&mut feed).await;
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(snap.messages[0].text, "for grace");
}

#[tokio::test]
async fn clearing_a_chat_empties_it_for_both_sides() {
    let store = Arc::new(MemoryBackend::new());
    let alice = TestApp::on_store(store.clone());
    let me = alice.register("Ada", "ada", "ada@example.com").await;
    let bob = TestApp::on_store(store.clone());
    let them = bob.register("Grace", "grace", "grace@example.com").await;

    let alice_sync = alice.client.sync().unwrap();
    let bob_sync = bob.client.sync().unwrap();

    alice_sync.send_private("one", them.id).await.unwrap();
    bob_sync.send_private("two", me.id).await.unwrap();

    bob_sync.set_active(Some(me.id));
    let mut bob_feed = bob_sync.active_feed();
    loop {
        let snap = synced(&mut bob_feed).await;
        if snap.messages.len() == 2 {
            break;
        }
    }

    let channel = ChannelId::direct(me.id, them.id);
    let deleted = alice_sync.clear(&channel).await.unwrap();
    assert_eq!(deleted, 2);

    // Bob's open subscription converges on the emptied channel; each
    // deletion re-emits, so wait out the intermediate snapshots
    loop {
        let snap = synced(&mut bob_feed).await;
        if snap.messages.is_empty() {
            break;
        }
    }
}

#[tokio::test]
async fn shutdown_leaves_no_stale_updates() {
    let store = Arc::new(MemoryBackend::new());
    let alice = TestApp::on_store(store.clone());
    let me = alice.register("Ada", "ada", "ada@example.com").await;
    let bob = TestApp::on_store(store.clone());
    let them = bob.register("Grace", "grace", "grace@example.com").await;

    let alice_sync = alice.client.sync().unwrap();
    let bob_sync = bob.client.sync().unwrap();
    alice_sync.set_contacts(&[them.id]);

    alice.client.logout().await.unwrap();

    bob_sync.send_private("anyone home?", me.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(alice_sync.unread_for(them.id), 0);
    assert_eq!(alice_sync.public_feed().borrow().state, SyncState::Unsubscribed);
}
