//! Persistence boundary.
//!
//! A [`PatchState`] carries everything needed to rebuild a patch: module types
//! and logical IDs, connections, each module's parameter values, and the
//! cross-cutting controls (mute, hardware input mapping). It derives serde's
//! traits and leaves the file format to the caller.

use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::topology::{Connection, LogicalId};

/// One parameter value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamValue {
    pub param: u32,
    pub value: f32,
}

/// A module as persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    pub id: LogicalId,
    pub module_type: String,
    #[serde(default)]
    pub params: Vec<ParamValue>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub input_mapping: Vec<usize>,
    /// Connections detached while muted, restored on unmute
    #[serde(default)]
    pub muted_connections: Vec<Connection>,
}

/// A whole patch as persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchState {
    pub modules: Vec<ModuleState>,
    pub connections: Vec<Connection>,
    /// Next logical ID to allocate; loading never allocates below it
    #[serde(default)]
    pub next_id: u32,
}

impl PatchState {
    pub fn module(&self, id: LogicalId) -> Option<&ModuleState> {
        self.modules.iter().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let osc = LogicalId::from_raw(1);
        let amp = LogicalId::from_raw(2);
        let state = PatchState {
            modules: vec![
                ModuleState {
                    id: osc,
                    module_type: "sine".into(),
                    params: vec![ParamValue {
                        param: 0,
                        value: 220.0,
                    }],
                    muted: false,
                    input_mapping: Vec::new(),
                    muted_connections: Vec::new(),
                },
                ModuleState {
                    id: amp,
                    module_type: "gain".into(),
                    params: Vec::new(),
                    muted: false,
                    input_mapping: vec![1],
                    muted_connections: Vec::new(),
                },
            ],
            connections: vec![
                Connection::new(osc, 0, amp, 0),
                Connection::new(amp, 0, LogicalId::MAIN_OUTPUT, 0),
            ],
            next_id: 3,
        };

        let json = serde_json::to_string(&state).unwrap();
        let back: PatchState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert!(back.connections[1].dst_is_main_output);
        assert_eq!(back.module(amp).unwrap().input_mapping, vec![1]);
    }

    #[test]
    fn optional_fields_default() {
        let json = r#"{
            "modules": [{ "id": 4, "module_type": "gain" }],
            "connections": []
        }"#;
        let state: PatchState = serde_json::from_str(json).unwrap();
        assert_eq!(state.next_id, 0);
        assert!(!state.modules[0].muted);
        assert!(state.modules[0].params.is_empty());
    }
}
