//! Seeded differential sessions: random concurrent editing with shuffled,
//! postponed and gap-inducing delivery, asserting convergence, state-vector
//! monotonicity and pending-area hygiene across both wire formats.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use docdelta::{
    apply_update, encode_state_as_update, Content, DeleteSet, Doc, Format, Id, Options,
};

const ROOT: &str = "text";
const MAP_ROOT: &str = "meta";
const MAP_KEYS: [&str; 3] = ["a", "b", "c"];

#[test]
fn differential_sessions_converge() {
    let seeds = [
        0x5eed_c0de_u64,
        0x0000_0000_0000_0001_u64,
        0x0000_0000_0000_00ff_u64,
        0x0000_0000_00c0_ffee_u64,
        0x0123_4567_89ab_cdef_u64,
    ];
    for seed in seeds {
        for format in [Format::V1, Format::V2] {
            run_session(seed, format);
        }
    }
}

fn run_session(seed: u64, format: Format) {
    let mut rng = StdRng::seed_from_u64(seed ^ (format as u64) << 32);
    let mut docs: Vec<Doc> = (1..=3)
        .map(|client| {
            Doc::with_options(Options {
                client_id: Some(client),
                format,
            })
        })
        .collect();
    // Updates whose delivery was postponed to a later round.
    let mut postponed: Vec<(usize, Vec<u8>)> = Vec::new();

    for _round in 0..8 {
        for doc in docs.iter_mut() {
            for _ in 0..rng.gen_range(1..4) {
                random_edit(&mut rng, doc);
            }
        }

        // Produce updates for random ordered pairs, then deliver them in a
        // shuffled order; some are postponed, some skip ahead of the
        // receiver's state to force buffering.
        let mut deliveries: Vec<(usize, Vec<u8>)> = Vec::new();
        for _ in 0..6 {
            let src = rng.gen_range(0..docs.len());
            let dst = rng.gen_range(0..docs.len());
            if src == dst {
                continue;
            }
            let mut target = docs[dst].state_vector();
            if rng.gen_bool(0.2) {
                // Pretend the receiver knows a little more than it does: the
                // update starts past the receiver's state and must wait in
                // the pending area until the gap is filled.
                let src_client = docs[src].client_id;
                let ahead = target.get(src_client) + rng.gen_range(1..3);
                if ahead < docs[src].store.state(src_client) {
                    target.set_max(src_client, ahead);
                }
            }
            deliveries.push((dst, encode_state_as_update(&docs[src], &target)));
        }
        deliveries.append(&mut postponed);
        deliveries.shuffle(&mut rng);
        for (dst, update) in deliveries {
            if rng.gen_bool(0.25) {
                postponed.push((dst, update));
            } else {
                deliver(&mut docs, dst, &update);
            }
        }
    }

    for (dst, update) in std::mem::take(&mut postponed) {
        deliver(&mut docs, dst, &update);
    }
    // Full mesh twice: everything pending must drain.
    for _ in 0..2 {
        for src in 0..docs.len() {
            for dst in 0..docs.len() {
                if src != dst {
                    let update = encode_state_as_update(&docs[src], &docs[dst].state_vector());
                    deliver(&mut docs, dst, &update);
                }
            }
        }
    }

    let reference = &docs[0];
    assert!(
        reference.store.pending_stack.is_empty(),
        "seed {seed:#x}: work left on the stack after full sync"
    );
    for doc in &docs[1..] {
        assert_eq!(
            reference.state_vector(),
            doc.state_vector(),
            "seed {seed:#x}: state vectors diverged"
        );
        assert_eq!(
            DeleteSet::from_store(&reference.store),
            DeleteSet::from_store(&doc.store),
            "seed {seed:#x}: delete sets diverged"
        );
        assert_eq!(
            atoms(reference, ROOT),
            atoms(doc, ROOT),
            "seed {seed:#x}: sequences diverged"
        );
        for key in MAP_KEYS {
            assert_eq!(
                map_value(reference, key),
                map_value(doc, key),
                "seed {seed:#x}: map key {key} diverged"
            );
        }
        assert!(doc.store.pending_client_refs.is_empty());
        assert!(doc.store.pending_delete_sets.is_empty());
    }
}

/// Applies an update and checks the invariants every application must keep.
fn deliver(docs: &mut [Doc], dst: usize, update: &[u8]) {
    let before = docs[dst].state_vector();
    apply_update(&mut docs[dst], update).expect("generated updates are well-formed");
    let after = docs[dst].state_vector();
    for (client, clock) in before.iter() {
        assert!(
            after.get(client) >= clock,
            "state vector went backwards for client {client}"
        );
    }
    for pending in docs[dst].store.pending_client_refs.values() {
        assert_eq!(pending.i, 0);
        assert!(!pending.refs.is_empty());
    }
}

fn random_edit(rng: &mut StdRng, doc: &mut Doc) {
    let choice = rng.gen_range(0..10);
    doc.transact(|txn| match choice {
        0..=3 => {
            let text: String = (0..rng.gen_range(1..5))
                .map(|_| (b'a' + rng.gen_range(0..26)) as char)
                .collect();
            txn.push(ROOT, Content::String(text));
        }
        4..=5 => {
            let anchors = txn.doc().store.sequence_ids(ROOT);
            let anchor = anchors.choose(rng).copied();
            txn.insert_after(ROOT, anchor, Content::String("*".into()));
        }
        6 => {
            let targets = txn.doc().store.sequence_ids(ROOT);
            if let Some(&target) = targets.choose(rng) {
                let len = txn.doc().store.get_item(target).map_or(1, |i| i.len);
                let del = rng.gen_range(1..=len);
                txn.delete(target, del);
            }
        }
        7 => {
            let key = MAP_KEYS[rng.gen_range(0..MAP_KEYS.len())];
            let value = serde_json::json!(rng.gen_range(0..100));
            txn.set_map(MAP_ROOT, key, Content::Json(vec![value]));
        }
        8 => {
            txn.push(ROOT, Content::Embed(serde_json::json!({"n": rng.gen_range(0..9)})));
        }
        _ => {
            txn.push(ROOT, Content::Binary(vec![rng.gen()]));
        }
    });
}

/// Flattens the live sequence into per-clock atoms, so block partitioning
/// differences between replicas cannot mask or fake a divergence.
fn atoms(doc: &Doc, root: &str) -> Vec<String> {
    let mut out = Vec::new();
    for block_id in doc.store.sequence_ids(root) {
        let item = doc
            .store
            .get_item(block_id)
            .expect("sequence ids resolve to items");
        match &item.content {
            Content::String(s) => out.extend(s.chars().map(|c| c.to_string())),
            Content::Json(values) => out.extend(values.iter().map(|v| v.to_string())),
            other => out.push(format!("{other:?}")),
        }
    }
    out
}

fn map_value(doc: &Doc, key: &str) -> Option<(Content, bool, Id)> {
    doc.store
        .map_entry(MAP_ROOT, key)
        .map(|item| (item.content.clone(), item.deleted, item.id))
}
