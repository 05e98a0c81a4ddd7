//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Crysms.
//
// Crysms is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crysms is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crysms. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::prelude::*;
use proptest::prelude::*;
use tempfile::TempDir;

use super::*;
use crate::crypt::master_key::MasterKey;
use crate::support::error::Error;
use crate::support::storage_config::IoConfig;

fn new_storage() -> Storage {
    crate::init_test_log();
    Storage::in_memory(&MasterKey::new()).unwrap()
}

fn quiet_io() -> IoConfig {
    IoConfig {
        retries: 0,
        sync: false,
    }
}

fn assert_healthy(st: &mut LockedStorage<'_>) -> IntegrityReport {
    let report = st.check_integrity().unwrap();
    assert!(report.is_ok(), "Integrity check failed:\n{}", report);
    report
}

#[test]
fn conversation_with_keys_and_message() {
    let storage = new_storage();
    let mut st = storage.lock();

    let mut c1 = Conversation::create(&mut st, "+447700900123").unwrap();
    let sim = SimNumber::phone("+447700900999");
    let k1 = SessionKeys::create(&mut st, &mut c1, &sim).unwrap();
    let mut m1 = Message::create(&mut st, &mut c1).unwrap();
    m1.set_body(b"hello, world").unwrap();

    c1.save(&mut st).unwrap();
    k1.save(&mut st).unwrap();
    m1.save(&mut st).unwrap();

    st.clear_cache();
    assert_eq!(0, st.cached_entries());

    let c1 = Conversation::get(&mut st, c1.index()).unwrap();
    assert_eq!(k1.index(), c1.session_keys_head());
    assert_eq!(m1.index(), c1.messages_head());

    let k1 = SessionKeys::get(&mut st, k1.index()).unwrap();
    assert_eq!(c1.index(), k1.links().parent);
    let m1 = Message::get(&mut st, m1.index()).unwrap();
    assert_eq!(c1.index(), m1.links().parent);
    assert_eq!(b"hello, world", m1.body());
    assert_eq!(0, m1.parts_head());
    assert_eq!(1, m1.part_count(&mut st).unwrap());

    let report = assert_healthy(&mut st);
    assert_eq!(1, report.count(EntryKind::Conversation));
    assert_eq!(1, report.count(EntryKind::SessionKeys));
    assert_eq!(1, report.count(EntryKind::Message));
}

#[test]
fn every_kind_round_trips() {
    let storage = new_storage();
    let mut st = storage.lock();

    let mut conversation = Conversation::create(&mut st, "bob").unwrap();
    conversation.set_peer("+15550100").unwrap();
    conversation.save(&mut st).unwrap();

    let mut keys =
        SessionKeys::create(&mut st, &mut conversation, &SimNumber::phone("1"))
            .unwrap();
    keys.set_sim(&SimNumber::serial("89440000000000000001")).unwrap();
    keys.set_sent(true);
    keys.set_outbound_key(&[1; KEY_LENGTH]);
    keys.set_inbound_key(&[2; KEY_LENGTH]);
    keys.set_next_id_out(200);
    keys.set_last_id_in(17);
    keys.save(&mut st).unwrap();

    let timestamp = Utc.ymd(2020, 5, 17).and_hms_milli(13, 4, 5, 678);
    let mut message = Message::create(&mut st, &mut conversation).unwrap();
    message.set_direction(Direction::Outgoing);
    message.set_flag(MessageFlags::DELIVERED_PART, true);
    message.set_flag(MessageFlags::ASCII, true);
    message.set_timestamp(timestamp);
    message.set_body(&[b'a'; BODY_CAPACITY]).unwrap();
    message.save(&mut st).unwrap();

    let mut part =
        MessagePart::create(&mut st, &mut message, b"continuation").unwrap();
    part.set_delivered(true);
    part.save(&mut st).unwrap();

    st.clear_cache();

    let conversation =
        Conversation::get(&mut st, conversation.index()).unwrap();
    assert_eq!("+15550100", conversation.peer());

    let keys = SessionKeys::get(&mut st, keys.index()).unwrap();
    assert_eq!(SimNumber::serial("89440000000000000001"), keys.sim());
    assert!(keys.is_sent());
    assert!(!keys.is_confirmed());
    assert_eq!(&[1; KEY_LENGTH], keys.outbound_key());
    assert_eq!(&[2; KEY_LENGTH], keys.inbound_key());
    assert_eq!(200, keys.next_id_out());
    assert_eq!(17, keys.last_id_in());

    let message = Message::get(&mut st, message.index()).unwrap();
    assert_eq!(Direction::Outgoing, message.direction());
    assert_eq!(
        MessageFlags::OUTGOING
            | MessageFlags::DELIVERED_PART
            | MessageFlags::ASCII,
        message.flags()
    );
    assert_eq!(timestamp, message.timestamp());
    assert_eq!(&[b'a'; BODY_CAPACITY][..], message.body());
    assert_eq!(part.index(), message.parts_head());

    let part = MessagePart::get(&mut st, part.index()).unwrap();
    assert_eq!(b"continuation", part.body());
    assert!(part.is_delivered());
    assert_eq!(message.index(), part.parent(&mut st).unwrap().index());

    assert_healthy(&mut st);
}

#[test]
fn free_list_conservation() {
    let storage = new_storage();
    let mut st = storage.lock();
    let initial = st.free_list_len().unwrap();
    assert_eq!(GROWTH_BATCH, initial);

    let mut conversations = Vec::new();
    for k in 1..=GROWTH_BATCH + 8 {
        let peer = format!("peer{}", k);
        conversations.push(Conversation::create(&mut st, &peer).unwrap());

        let expected = if k <= GROWTH_BATCH {
            GROWTH_BATCH - k
        } else {
            2 * GROWTH_BATCH - k
        };
        assert_eq!(expected, st.free_list_len().unwrap(), "after {}", k);
    }
    assert_eq!(1 + 2 * GROWTH_BATCH, st.entry_count());

    let free = st.free_list_len().unwrap();
    for (k, conversation) in conversations.drain(..10).enumerate() {
        conversation.delete(&mut st).unwrap();
        assert_eq!(free + k as u32 + 1, st.free_list_len().unwrap());
    }

    // Freed slots are reused before the file grows again
    for _ in 0..free + 10 {
        Conversation::create(&mut st, "again").unwrap();
    }
    assert_eq!(1 + 2 * GROWTH_BATCH, st.entry_count());
    assert_eq!(0, st.free_list_len().unwrap());

    assert_healthy(&mut st);
}

#[test]
fn cascading_delete() {
    let storage = new_storage();
    let mut st = storage.lock();

    let mut survivor = Conversation::create(&mut st, "carol").unwrap();
    let survivor_message = Message::create(&mut st, &mut survivor).unwrap();

    let mut doomed = Conversation::create(&mut st, "dave").unwrap();
    for sim in &["1", "2", "3"] {
        SessionKeys::create(&mut st, &mut doomed, &SimNumber::phone(sim))
            .unwrap();
    }
    let part_counts = [0usize, 1, 2, 5];
    for &parts in &part_counts {
        let mut message = Message::create(&mut st, &mut doomed).unwrap();
        let bodies = (0..parts).map(|i| vec![i as u8; 10]).collect::<Vec<_>>();
        message.assign_parts(&mut st, &bodies).unwrap();
    }

    let before = st.free_list_len().unwrap();
    doomed.delete(&mut st).unwrap();
    let freed = 1 + 3 + part_counts.len() + part_counts.iter().sum::<usize>();
    assert_eq!(before + freed as u32, st.free_list_len().unwrap());

    let report = assert_healthy(&mut st);
    assert_eq!(1, report.count(EntryKind::Conversation));
    assert_eq!(0, report.count(EntryKind::SessionKeys));
    assert_eq!(1, report.count(EntryKind::Message));
    assert_eq!(0, report.count(EntryKind::MessagePart));

    let all = Conversation::all(&mut st).unwrap();
    assert_eq!(1, all.len());
    assert_eq!(survivor.index(), all[0].index());
    assert_eq!(
        vec![survivor_message.index()],
        all[0]
            .messages(&mut st)
            .unwrap()
            .iter()
            .map(Message::index)
            .collect::<Vec<_>>()
    );
}

#[test]
fn part_list_reassignment() {
    let storage = new_storage();
    let mut st = storage.lock();
    let mut conversation = Conversation::create(&mut st, "erin").unwrap();
    let mut message = Message::create(&mut st, &mut conversation).unwrap();

    let old = message
        .assign_parts(&mut st, &[b"one".to_vec(), b"two".to_vec()])
        .unwrap();
    assert_eq!(old[0].index(), message.parts_head());

    let free_before = st.free_list_len().unwrap();
    let new = message
        .assign_parts(&mut st, &[&b"alpha"[..], b"beta", b"gamma"])
        .unwrap();
    // Two freed, three allocated
    assert_eq!(free_before + 2 - 3, st.free_list_len().unwrap());

    st.clear_cache();
    let message = Message::get(&mut st, message.index()).unwrap();
    assert_eq!(new[0].index(), message.parts_head());
    let bodies = message
        .parts(&mut st)
        .unwrap()
        .into_iter()
        .map(|p| p.body().to_vec())
        .collect::<Vec<_>>();
    assert_eq!(
        vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()],
        bodies
    );

    // The old parts are back on the free list, not anywhere in the forest
    let report = assert_healthy(&mut st);
    assert_eq!(3, report.count(EntryKind::MessagePart));

    let mut message = message;
    let overlong = vec![0u8; PART_CAPACITY + 1];
    assert_matches!(
        Err(Error::DataTooLong),
        message.assign_parts(&mut st, &[&b"fine"[..], &overlong[..]])
    );
    // Rejected before anything was touched
    assert_eq!(3, message.parts(&mut st).unwrap().len());
}

#[test]
fn parts_by_position() {
    let storage = new_storage();
    let mut st = storage.lock();
    let mut conversation = Conversation::create(&mut st, "frank").unwrap();
    let mut message = Message::create(&mut st, &mut conversation).unwrap();

    message.set_part(&mut st, 0, b"inline").unwrap();
    message.set_part(&mut st, 1, b"first").unwrap();
    message.set_part(&mut st, 2, b"second").unwrap();
    assert_eq!(3, message.part_count(&mut st).unwrap());

    let mut first = message.parts(&mut st).unwrap().remove(0);
    first.set_delivered(true);
    first.save(&mut st).unwrap();

    // Appending rebuilds the list but keeps delivery state
    message.set_part(&mut st, 3, b"third").unwrap();
    message.set_part(&mut st, 2, b"SECOND").unwrap();
    assert_matches!(
        Err(Error::PartOutOfRange),
        message.set_part(&mut st, 5, b"nope")
    );
    assert_matches!(Err(Error::PartOutOfRange), message.get_part(&mut st, 4));

    st.clear_cache();
    let message = Message::get(&mut st, message.index()).unwrap();
    assert_eq!(b"inline".to_vec(), message.get_part(&mut st, 0).unwrap());
    assert_eq!(b"first".to_vec(), message.get_part(&mut st, 1).unwrap());
    assert_eq!(b"SECOND".to_vec(), message.get_part(&mut st, 2).unwrap());
    assert_eq!(b"third".to_vec(), message.get_part(&mut st, 3).unwrap());
    let delivered = message
        .parts(&mut st)
        .unwrap()
        .iter()
        .map(MessagePart::is_delivered)
        .collect::<Vec<_>>();
    assert_eq!(vec![true, false, false], delivered);

    assert_healthy(&mut st);
}

#[test]
fn long_data_spans_parts() {
    let storage = new_storage();
    let mut st = storage.lock();
    let mut conversation = Conversation::create(&mut st, "grace").unwrap();
    let mut message = Message::create(&mut st, &mut conversation).unwrap();

    let data = (0..500u32).map(|i| i as u8).collect::<Vec<_>>();
    message.store_data(&mut st, &data).unwrap();
    assert_eq!(4, message.part_count(&mut st).unwrap());
    assert_eq!(BODY_CAPACITY, message.body().len());

    st.clear_cache();
    let mut message = Message::get(&mut st, message.index()).unwrap();
    assert_eq!(data, message.load_data(&mut st).unwrap());

    message.store_data(&mut st, b"short").unwrap();
    assert_eq!(1, message.part_count(&mut st).unwrap());
    assert_eq!(b"short".to_vec(), message.load_data(&mut st).unwrap());

    let report = assert_healthy(&mut st);
    assert_eq!(0, report.count(EntryKind::MessagePart));
}

#[test]
fn unlink_from_any_position() {
    let storage = new_storage();
    let mut st = storage.lock();
    let mut conversation = Conversation::create(&mut st, "heidi").unwrap();
    let m1 = Message::create(&mut st, &mut conversation).unwrap();
    let m2 = Message::create(&mut st, &mut conversation).unwrap();
    let m3 = Message::create(&mut st, &mut conversation).unwrap();

    // Most recent first
    let order = conversation
        .messages(&mut st)
        .unwrap()
        .iter()
        .map(Message::index)
        .collect::<Vec<_>>();
    assert_eq!(vec![m3.index(), m2.index(), m1.index()], order);

    m2.delete(&mut st).unwrap();
    let m3 = Message::get(&mut st, m3.index()).unwrap();
    let m1 = Message::get(&mut st, m1.index()).unwrap();
    assert_eq!(m1.index(), m3.links().next);
    assert_eq!(m3.index(), m1.links().prev);
    assert_healthy(&mut st);

    m3.delete(&mut st).unwrap();
    let m1 = Message::get(&mut st, m1.index()).unwrap();
    assert_eq!(0, m1.links().prev);
    assert!(m1.prev(&mut st).unwrap().is_none());
    assert!(m1.next(&mut st).unwrap().is_none());
    let conversation =
        Conversation::get(&mut st, conversation.index()).unwrap();
    assert_eq!(m1.index(), conversation.messages_head());
    assert_healthy(&mut st);

    m1.delete(&mut st).unwrap();
    let conversation =
        Conversation::get(&mut st, conversation.index()).unwrap();
    assert_eq!(0, conversation.messages_head());
    assert_healthy(&mut st);
}

#[test]
fn stale_copies_do_not_clobber_links() {
    let storage = new_storage();
    let mut st = storage.lock();
    let mut conversation = Conversation::create(&mut st, "ivan").unwrap();
    let mut stale = conversation.clone();

    let message = Message::create(&mut st, &mut conversation).unwrap();
    Conversation::create(&mut st, "judy").unwrap();

    stale.set_peer("ivan2").unwrap();
    stale.save(&mut st).unwrap();

    st.clear_cache();
    let reloaded = Conversation::get(&mut st, conversation.index()).unwrap();
    assert_eq!("ivan2", reloaded.peer());
    assert_eq!(message.index(), reloaded.messages_head());
    assert_ne!(0, reloaded.links().prev);
    assert_healthy(&mut st);
}

#[test]
fn deleted_copies_are_rejected() {
    let storage = new_storage();
    let mut st = storage.lock();
    let mut conversation = Conversation::create(&mut st, "nina").unwrap();
    let mut message = Message::create(&mut st, &mut conversation).unwrap();

    // The replacement part lands in the slot the old one was freed from
    let mut old = message
        .assign_parts(&mut st, &[&b"old"[..]])
        .unwrap()
        .remove(0);
    let new = message.assign_parts(&mut st, &[&b"new"[..]]).unwrap();
    assert_eq!(old.index(), new[0].index());

    old.set_body(b"stale").unwrap();
    assert_matches!(Err(Error::Deleted), old.save(&mut st));
    assert_matches!(Err(Error::Deleted), old.delete(&mut st));
    assert_eq!(b"new".to_vec(), message.get_part(&mut st, 1).unwrap());

    // Slots which are simply free again
    let mut stale_part = new[0].clone();
    let stale_message = message.clone();
    conversation.delete(&mut st).unwrap();
    st.clear_cache();

    stale_part.set_body(b"zombie").unwrap();
    assert_matches!(Err(Error::Deleted), stale_part.save(&mut st));
    assert_matches!(
        Err(Error::Deleted),
        MessagePart::create(&mut st, &mut stale_message.clone(), b"x")
    );
    assert_matches!(Err(Error::Deleted), stale_message.delete(&mut st));

    // Every free slot is still usable
    let free = st.free_list_len().unwrap();
    for _ in 0..free {
        Conversation::create(&mut st, "again").unwrap();
    }
    assert_eq!(0, st.free_list_len().unwrap());
    assert_healthy(&mut st);
}

fn part_bodies(st: &mut LockedStorage<'_>, message: &Message) -> Vec<Vec<u8>> {
    message
        .parts(st)
        .unwrap()
        .into_iter()
        .map(|p| p.body().to_vec())
        .collect()
}

#[test]
fn delete_single_parts() {
    let storage = new_storage();
    let mut st = storage.lock();
    let mut conversation = Conversation::create(&mut st, "oscar").unwrap();
    let mut message = Message::create(&mut st, &mut conversation).unwrap();
    let parts = message
        .assign_parts(&mut st, &[&b"one"[..], b"two", b"three"])
        .unwrap();

    let free = st.free_list_len().unwrap();
    parts[1].clone().delete(&mut st).unwrap();
    assert_eq!(free + 1, st.free_list_len().unwrap());
    assert_eq!(
        vec![b"one".to_vec(), b"three".to_vec()],
        part_bodies(&mut st, &message)
    );
    let one = MessagePart::get(&mut st, parts[0].index()).unwrap();
    let three = MessagePart::get(&mut st, parts[2].index()).unwrap();
    assert_eq!(three.index(), one.links().next);
    assert_eq!(one.index(), three.links().prev);
    assert_healthy(&mut st);

    three.delete(&mut st).unwrap();
    assert_eq!(vec![b"one".to_vec()], part_bodies(&mut st, &message));
    let message = Message::get(&mut st, message.index()).unwrap();
    assert_eq!(one.index(), message.parts_head());
    assert_healthy(&mut st);

    one.delete(&mut st).unwrap();
    let message = Message::get(&mut st, message.index()).unwrap();
    assert_eq!(0, message.parts_head());
    assert_eq!(1, message.part_count(&mut st).unwrap());
    let report = assert_healthy(&mut st);
    assert_eq!(0, report.count(EntryKind::MessagePart));
    assert_eq!(1, report.count(EntryKind::Message));
}

#[test]
fn lookups() {
    let storage = new_storage();
    let mut st = storage.lock();
    let sim_a = SimNumber::phone("+15550001");
    let sim_b = SimNumber::serial("8901");

    let mut alice = Conversation::create(&mut st, "alice").unwrap();
    let keys_a = SessionKeys::create(&mut st, &mut alice, &sim_a).unwrap();
    let keys_b = SessionKeys::create(&mut st, &mut alice, &sim_b).unwrap();
    Conversation::create(&mut st, "bob").unwrap();

    let found = Conversation::find_by_peer(&mut st, "alice").unwrap().unwrap();
    assert_eq!(alice.index(), found.index());
    assert!(Conversation::find_by_peer(&mut st, "mallory")
        .unwrap()
        .is_none());

    assert_eq!(
        Some(keys_a.index()),
        found
            .session_keys_for_sim(&mut st, &sim_a)
            .unwrap()
            .map(|k| k.index())
    );
    assert_eq!(
        Some(keys_b.index()),
        found
            .session_keys_for_sim(&mut st, &sim_b)
            .unwrap()
            .map(|k| k.index())
    );
    // Same digits, different kind of identifier
    assert!(found
        .session_keys_for_sim(&mut st, &SimNumber::phone("8901"))
        .unwrap()
        .is_none());

    let peers = Conversation::all(&mut st)
        .unwrap()
        .into_iter()
        .map(|c| c.peer().to_owned())
        .collect::<Vec<_>>();
    assert_eq!(vec!["bob", "alice"], peers);
}

#[test]
fn pointer_contract() {
    let storage = new_storage();
    let mut st = storage.lock();
    let conversation = Conversation::create(&mut st, "kim").unwrap();

    assert_matches!(
        Err(Error::IndexOutOfRange(0)),
        Conversation::get(&mut st, 0)
    );
    let count = st.entry_count();
    assert_matches!(
        Err(Error::IndexOutOfRange(..)),
        Conversation::get(&mut st, count)
    );
    assert_matches!(Err(Error::IndexOutOfRange(-5)), to_index(-5));
    assert_matches!(
        Err(Error::WrongKind),
        Message::get(&mut st, conversation.index())
    );
    assert_matches!(
        Err(Error::StringTooLong),
        Conversation::create(&mut st, &"x".repeat(PEER_WIDTH))
    );

    // None of that changed anything
    assert_eq!(count, st.entry_count());
    assert_healthy(&mut st);
}

#[test]
fn background_summary() {
    let storage = Arc::new(new_storage());
    let t0 = Utc.timestamp_millis(1_600_000_000_000);

    storage
        .transact(|st| {
            let mut alice = Conversation::create(st, "alice")?;
            for i in 0..3 {
                let mut message = Message::create(st, &mut alice)?;
                message.set_timestamp(t0 + chrono::Duration::minutes(i));
                message.set_unread(1 == i);
                message.save(st)?;
            }
            Conversation::create(st, "bob")?;
            Ok(())
        })
        .unwrap();

    let summaries = storage
        .scan_in_background(summarise_conversations)
        .recv_timeout(Duration::from_secs(30))
        .unwrap()
        .unwrap();

    assert_eq!(2, summaries.len());
    assert_eq!("bob", summaries[0].peer);
    assert_eq!(0, summaries[0].message_count);
    assert_eq!(None, summaries[0].latest);
    assert_eq!("alice", summaries[1].peer);
    assert_eq!(3, summaries[1].message_count);
    assert_eq!(1, summaries[1].unread_count);
    assert_eq!(Some(t0 + chrono::Duration::minutes(2)), summaries[1].latest);
}

#[test]
fn scans_queue_behind_lock_holder() {
    let storage = Arc::new(new_storage());
    let st = storage.lock();

    // Far more scans than the worker could ever be expected to buffer, all
    // submitted while this thread holds the lock
    let receivers = (0..1000)
        .map(|_| {
            storage.scan_in_background(|st: &mut LockedStorage<'_>| {
                Ok(st.entry_count())
            })
        })
        .collect::<Vec<_>>();
    let count = st.entry_count();
    drop(st);

    for receiver in receivers {
        assert_eq!(
            count,
            receiver
                .recv_timeout(Duration::from_secs(30))
                .unwrap()
                .unwrap()
        );
    }
}

#[test]
fn panic_while_locked_leaves_storage_usable() {
    let storage = Arc::new(new_storage());
    let index = storage
        .transact(|st| Ok(Conversation::create(st, "olga")?.index()))
        .unwrap();

    let storage2 = Arc::clone(&storage);
    let result = std::thread::spawn(move || {
        let mut st = storage2.lock();
        Conversation::create(&mut st, "pete").unwrap();
        panic!("deliberate");
    })
    .join();
    assert!(result.is_err());

    let mut st = storage.lock();
    assert_eq!("olga", Conversation::get(&mut st, index).unwrap().peer());
    assert_eq!(2, Conversation::all(&mut st).unwrap().len());
    assert_healthy(&mut st);
}

fn open(path: &Path, key: &MasterKey) -> Result<Storage, Error> {
    Storage::open(path, key, quiet_io())
}

#[test]
fn reopen_file() {
    crate::init_test_log();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.sms");
    let key = MasterKey::new();

    let (conversation, message) = {
        let storage = open(&path, &key).unwrap();
        let mut st = storage.lock();
        let mut conversation = Conversation::create(&mut st, "liam").unwrap();
        let mut message = Message::create(&mut st, &mut conversation).unwrap();
        message.store_data(&mut st, &[b'z'; 300]).unwrap();
        (conversation.index(), message.index())
    };

    let data = fs::read(&path).unwrap();
    assert_eq!((1 + GROWTH_BATCH) as usize * CHUNK_SIZE, data.len());
    assert_eq!(b"SMS\x01", &data[..4]);

    let storage = open(&path, &key).unwrap();
    let mut st = storage.lock();
    let conversation = Conversation::get(&mut st, conversation).unwrap();
    assert_eq!("liam", conversation.peer());
    assert_eq!(message, conversation.messages_head());
    let message = Message::get(&mut st, message).unwrap();
    assert_eq!(vec![b'z'; 300], message.load_data(&mut st).unwrap());
    assert_healthy(&mut st);
}

#[test]
fn wrong_key_and_tampering() {
    crate::init_test_log();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.sms");
    let key = MasterKey::new();

    let index = {
        let storage = open(&path, &key).unwrap();
        let mut st = storage.lock();
        Conversation::create(&mut st, "mallory").unwrap().index()
    };

    assert_matches!(
        Some(Error::AuthenticationFailed),
        open(&path, &MasterKey::new()).err()
    );

    let mut data = fs::read(&path).unwrap();
    data[index as usize * CHUNK_SIZE + 100] ^= 0x40;
    fs::write(&path, &data).unwrap();

    let storage = open(&path, &key).unwrap();
    let mut st = storage.lock();
    assert_matches!(
        Err(Error::AuthenticationFailed),
        Conversation::get(&mut st, index)
    );
    assert_matches!(Err(Error::AuthenticationFailed), st.check_integrity());
}

#[test]
fn format_errors() {
    crate::init_test_log();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.sms");
    let key = MasterKey::new();
    drop(open(&path, &key).unwrap());
    let pristine = fs::read(&path).unwrap();

    let mut data = pristine.clone();
    data[3] = 9;
    fs::write(&path, &data).unwrap();
    assert_matches!(
        Some(Error::UnsupportedVersion(9)),
        open(&path, &key).err()
    );

    data[..3].copy_from_slice(b"MMS");
    fs::write(&path, &data).unwrap();
    assert_matches!(Some(Error::BadMagic), open(&path, &key).err());

    let mut data = pristine;
    data.extend_from_slice(&[0u8; 10]);
    fs::write(&path, &data).unwrap();
    assert_matches!(Some(Error::BadFileLength(..)), open(&path, &key).err());
}

#[derive(Clone, Debug)]
enum Op {
    CreateConversation,
    CreateSessionKeys(usize),
    CreateMessage(usize, usize),
    AssignParts(usize, usize, usize),
    DeleteConversation(usize),
    DeleteSessionKeys(usize, usize),
    DeleteMessage(usize, usize),
    DeleteMessagePart(usize, usize, usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::CreateConversation),
        any::<usize>().prop_map(Op::CreateSessionKeys),
        (any::<usize>(), 0usize..600)
            .prop_map(|(c, len)| Op::CreateMessage(c, len)),
        (any::<usize>(), any::<usize>(), 0usize..4)
            .prop_map(|(c, m, n)| Op::AssignParts(c, m, n)),
        any::<usize>().prop_map(Op::DeleteConversation),
        (any::<usize>(), any::<usize>())
            .prop_map(|(c, k)| Op::DeleteSessionKeys(c, k)),
        (any::<usize>(), any::<usize>())
            .prop_map(|(c, m)| Op::DeleteMessage(c, m)),
        (any::<usize>(), any::<usize>(), any::<usize>())
            .prop_map(|(c, m, p)| Op::DeleteMessagePart(c, m, p)),
    ]
}

fn pick<T>(mut items: Vec<T>, i: usize) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        let len = items.len();
        Some(items.swap_remove(i % len))
    }
}

/// Apply `op`, returning the change in the number of live entries.
fn apply(st: &mut LockedStorage<'_>, op: Op) -> i64 {
    let conversations = Conversation::all(st).unwrap();
    match op {
        Op::CreateConversation => {
            Conversation::create(st, "peer").unwrap();
            1
        },

        Op::CreateSessionKeys(c) => match pick(conversations, c) {
            None => 0,
            Some(mut c) => {
                SessionKeys::create(st, &mut c, &SimNumber::phone("1"))
                    .unwrap();
                1
            },
        },

        Op::CreateMessage(c, len) => match pick(conversations, c) {
            None => 0,
            Some(mut c) => {
                let mut message = Message::create(st, &mut c).unwrap();
                let before = message.part_count(st).unwrap();
                message.store_data(st, &vec![b'm'; len]).unwrap();
                1 + (message.part_count(st).unwrap() - before) as i64
            },
        },

        Op::AssignParts(c, m, n) => {
            let message = pick(conversations, c)
                .and_then(|c| pick(c.messages(st).unwrap(), m));
            match message {
                None => 0,
                Some(mut message) => {
                    let before = message.parts(st).unwrap().len() as i64;
                    let bodies = vec![b"part".to_vec(); n];
                    message.assign_parts(st, &bodies).unwrap();
                    n as i64 - before
                },
            }
        },

        Op::DeleteConversation(c) => match pick(conversations, c) {
            None => 0,
            Some(c) => {
                let mut size = 1 + c.session_keys(st).unwrap().len() as i64;
                for message in c.messages(st).unwrap() {
                    size += message.part_count(st).unwrap() as i64;
                }
                c.delete(st).unwrap();
                -size
            },
        },

        Op::DeleteSessionKeys(c, k) => {
            let keys = pick(conversations, c)
                .and_then(|c| pick(c.session_keys(st).unwrap(), k));
            match keys {
                None => 0,
                Some(keys) => {
                    keys.delete(st).unwrap();
                    -1
                },
            }
        },

        Op::DeleteMessage(c, m) => {
            let message = pick(conversations, c)
                .and_then(|c| pick(c.messages(st).unwrap(), m));
            match message {
                None => 0,
                Some(message) => {
                    let size = message.part_count(st).unwrap() as i64;
                    message.delete(st).unwrap();
                    -size
                },
            }
        },

        Op::DeleteMessagePart(c, m, p) => {
            let part = pick(conversations, c)
                .and_then(|c| pick(c.messages(st).unwrap(), m))
                .and_then(|m| pick(m.parts(st).unwrap(), p));
            match part {
                None => 0,
                Some(part) => {
                    part.delete(st).unwrap();
                    -1
                },
            }
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_operations_preserve_structure(
        ops in prop::collection::vec(arb_op(), 1..40)
    ) {
        let storage = new_storage();
        let mut st = storage.lock();
        let mut live = 0i64;

        for op in ops {
            live += apply(&mut st, op);
            let free = st.free_list_len().unwrap() as i64;
            prop_assert_eq!(st.entry_count() as i64 - 1, live + free);
        }

        st.clear_cache();
        let report = st.check_integrity().unwrap();
        prop_assert!(report.is_ok(), "{}", report);
        prop_assert_eq!(
            live,
            report.counts.iter()
                .filter(|&(&kind, _)| EntryKind::Empty != kind)
                .map(|(_, &n)| n as i64)
                .sum::<i64>()
        );
    }
}
