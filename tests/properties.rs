//! Property-based tests for patch editing, the transport, and voice stealing.
//!
//! Uses proptest to generate edit sequences and block counts.

use std::collections::{BTreeMap, HashSet};

use klingt_rack::{Buffer, LogicalId, Rack, RackConfig, VoiceManager, BLOCK_SIZE};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Edit {
    Add(bool),
    Remove(usize),
    Connect(usize, usize, usize),
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        any::<bool>().prop_map(Edit::Add),
        (0usize..16).prop_map(Edit::Remove),
        (0usize..16, 0usize..16, 0usize..2).prop_map(|(a, b, ch)| Edit::Connect(a, b, ch)),
    ]
}

fn pick(live: &BTreeMap<LogicalId, &'static str>, index: usize) -> Option<LogicalId> {
    if live.is_empty() {
        None
    } else {
        live.keys().nth(index % live.len()).copied()
    }
}

fn connection_set(rack: &Rack) -> HashSet<(u32, usize, u32, usize)> {
    rack.connections_info()
        .into_iter()
        .map(|c| (c.src.get(), c.src_channel, c.dst.get(), c.dst_channel))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A logical ID keeps pointing at the same module through any sequence of
    /// unrelated edits, and removed IDs are never handed out again.
    #[test]
    fn logical_ids_are_stable(edits in prop::collection::vec(edit(), 1..60)) {
        let (rack, _renderer) = Rack::with_builtins(RackConfig::default()).unwrap();
        let mut live: BTreeMap<LogicalId, &'static str> = BTreeMap::new();
        let mut ever: HashSet<LogicalId> = HashSet::new();

        for edit in edits {
            match edit {
                Edit::Add(sine) => {
                    let module_type = if sine { "sine" } else { "gain" };
                    let id = rack.add_module(module_type).unwrap();
                    prop_assert!(ever.insert(id), "{id} was reused");
                    live.insert(id, module_type);
                }
                Edit::Remove(i) => {
                    if let Some(id) = pick(&live, i) {
                        prop_assert!(rack.remove_module(id));
                        live.remove(&id);
                    }
                }
                Edit::Connect(a, b, ch) => {
                    if let (Some(src), Some(dst)) = (pick(&live, a), pick(&live, b)) {
                        let _ = rack.connect(src, 0, dst, ch);
                    }
                }
            }
            rack.commit_changes().unwrap();

            let info = rack.modules_info();
            prop_assert_eq!(info.len(), live.len());
            for module in info {
                prop_assert_eq!(live.get(&module.id).copied(), Some(module.module_type.as_str()));
            }
            for connection in rack.connections_info() {
                prop_assert!(live.contains_key(&connection.src));
                prop_assert!(connection.dst_is_main_output || live.contains_key(&connection.dst));
            }
        }
    }

    /// Disconnecting right after a successful connect restores the exact
    /// previous connection set.
    #[test]
    fn connect_then_disconnect_is_identity(
        cables in prop::collection::vec((0usize..6, 0usize..2, 0usize..6, 0usize..2), 0..20),
        probe in (0usize..6, 0usize..2, 0usize..6, 0usize..2),
    ) {
        let (rack, _renderer) = Rack::with_builtins(RackConfig::default()).unwrap();
        let ids: Vec<LogicalId> = (0..6).map(|_| rack.add_module("gain").unwrap()).collect();
        for (a, ac, b, bc) in cables {
            let _ = rack.connect(ids[a], ac, ids[b], bc);
        }

        let before = connection_set(&rack);
        let (a, ac, b, bc) = probe;
        if rack.connect(ids[a], ac, ids[b], bc).is_ok() {
            prop_assert!(rack.disconnect(ids[a], ac, ids[b], bc));
        }
        prop_assert_eq!(connection_set(&rack), before);
        prop_assert!(rack.commit_changes().is_ok());
    }

    /// While playing at a fixed tempo, every block advances the position by
    /// exactly one block and beats track seconds.
    #[test]
    fn transport_stays_consistent(
        bpm in 20.0f64..999.0,
        blocks in 1usize..400,
        sample_rate in prop::sample::select(vec![44_100u32, 48_000, 96_000]),
    ) {
        let config = RackConfig::default().with_sample_rate(sample_rate);
        let (rack, mut renderer) = Rack::with_builtins(config).unwrap();
        let transport = rack.transport();
        transport.set_bpm(bpm);
        transport.play();

        let mut out = [Buffer::SILENT, Buffer::SILENT];
        let mut last_seconds = -1.0;
        for block in 1..=blocks {
            renderer.process(&[], &mut out);
            let state = transport.transport_state();
            let expected = (block * BLOCK_SIZE) as f64 / sample_rate as f64;

            prop_assert_eq!(state.sample_position, (block * BLOCK_SIZE) as u64);
            prop_assert!((state.song_position_seconds - expected).abs() < 1e-9);
            prop_assert!(state.song_position_seconds > last_seconds);
            prop_assert!((state.song_position_beats - state.song_position_seconds * bpm / 60.0).abs() < 1e-9);
            last_seconds = state.song_position_seconds;
        }
    }

    /// With every voice active, a note-on steals the oldest voice and that
    /// voice becomes the newest.
    #[test]
    fn stealing_takes_the_oldest_voice(
        voices in 1usize..16,
        notes in prop::collection::vec(0u8..128, 1..64),
    ) {
        let target = LogicalId::from_raw(1);
        let mut bank = VoiceManager::new(voices, voices);
        for note in 0..voices {
            bank.note_on(note as u8, 1.0, target);
        }

        for note in notes {
            let oldest = bank
                .voices()
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| v.age)
                .map(|(i, _)| i)
                .unwrap();
            let newest_age = bank.voices().iter().map(|v| v.age).max().unwrap();

            let assignment = bank.note_on(note, 0.5, target).unwrap();
            prop_assert_eq!(assignment.voice, oldest);
            prop_assert!(assignment.stolen.is_some());

            let voice = bank.voices()[oldest];
            prop_assert_eq!(voice.note_number, note);
            prop_assert!(voice.age > newest_age);
            prop_assert!(bank.voices().iter().all(|v| v.is_active));
        }
    }
}
