use std::collections::HashMap;

use gridimg_core::LoadState;

struct ModelEntry {
    load_state: LoadState,
    owner_process_id: u32,
}

/// Tracks, per model name, whether it is on disk, loading, or resident, and on
/// which worker (C2). The dispatcher (§4.4) is the sole writer.
#[derive(Default)]
pub(crate) struct ModelResidency {
    models: HashMap<String, ModelEntry>,
}

impl ModelResidency {
    /// Upsert semantics: a previously unknown model requires both a state and an owner.
    pub(crate) fn update(&mut self, name: &str, load_state: LoadState, owner: u32) {
        self.models.insert(
            name.to_string(),
            ModelEntry {
                load_state,
                owner_process_id: owner,
            },
        );
    }

    pub(crate) fn is_loaded(&self, name: &str) -> bool {
        self.models
            .get(name)
            .is_some_and(|m| m.load_state.is_resident())
    }

    pub(crate) fn is_loading(&self, name: &str) -> bool {
        self.models
            .get(name)
            .is_some_and(|m| m.load_state == LoadState::Loading)
    }

    pub(crate) fn owner_of(&self, name: &str) -> Option<u32> {
        self.models.get(name).map(|m| m.owner_process_id)
    }

    pub(crate) fn load_state_of(&self, name: &str) -> Option<LoadState> {
        self.models.get(name).map(|m| m.load_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unknown_model_is_not_loaded_or_loading() {
        let models = ModelResidency::default();
        assert!(!models.is_loaded("sd1"));
        assert!(!models.is_loading("sd1"));
        assert_eq!(models.owner_of("sd1"), None);
    }

    #[test]
    fn update_overwrites_previous_owner() {
        let mut models = ModelResidency::default();
        models.update("sd1", LoadState::Loading, 0);
        assert!(models.is_loading("sd1"));
        assert_eq!(models.owner_of("sd1"), Some(0));

        models.update("sd1", LoadState::LoadedInVram, 0);
        assert!(models.is_loaded("sd1"));
        assert!(!models.is_loading("sd1"));

        models.update("sd1", LoadState::OnDisk, 1);
        assert!(!models.is_loaded("sd1"));
        assert_eq!(models.owner_of("sd1"), Some(1));
    }

    proptest! {
        /// After any sequence of `update` calls for one model name, the map
        /// reflects exactly the most recent call: last-write-wins, with no
        /// residual state from an earlier owner or load state (§8).
        #[test]
        fn update_is_last_write_wins(
            updates in proptest::collection::vec((0u32..4, 0u8..4), 1..50)
        ) {
            let mut models = ModelResidency::default();
            let mut expected: Option<(LoadState, u32)> = None;

            for (owner, state_tag) in updates {
                let state = match state_tag {
                    0 => LoadState::OnDisk,
                    1 => LoadState::Loading,
                    2 => LoadState::LoadedInRam,
                    _ => LoadState::LoadedInVram,
                };
                models.update("sd1", state, owner);
                expected = Some((state, owner));

                let (exp_state, exp_owner) = expected.unwrap();
                prop_assert_eq!(models.owner_of("sd1"), Some(exp_owner));
                prop_assert_eq!(models.load_state_of("sd1"), Some(exp_state));
                prop_assert_eq!(models.is_loaded("sd1"), exp_state.is_resident());
                prop_assert_eq!(models.is_loading("sd1"), exp_state == LoadState::Loading);
            }
        }
    }
}
