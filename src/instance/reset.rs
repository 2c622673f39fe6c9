//! Script resets.

use std::time::Duration;

use tracing::info;

use super::{DEFAULT_STATE, ScriptInstance};
use crate::model::EventRecord;
use crate::model::event::names;

impl ScriptInstance {
    /// Reset from outside the script: drop in-flight work, pending events,
    /// saved state, grants and variables, then start over in `default`.
    pub fn reset_script(&self) {
        let was_running = self.is_running();
        info!(item_id = %self.identity.item_id, "resetting script");

        self.stop(Duration::ZERO);
        self.remove_state();
        self.revoke_grants();
        self.clear_queue();
        self.reset_vars();
        self.replace_state(DEFAULT_STATE.to_string());
        self.publish_event_mask();

        if was_running {
            self.start();
        }
        self.post_event(EventRecord::state_entry());
    }

    /// Reset requested by the script itself. Leaves the queue and the
    /// running flag alone, and does not queue another `state_entry` when
    /// that is the event doing the resetting.
    pub fn api_reset_script(&self) {
        self.remove_state();
        self.reset_vars();
        self.revoke_grants();
        self.replace_state(DEFAULT_STATE.to_string());
        self.publish_event_mask();

        if self.current_event().as_deref() != Some(names::STATE_ENTRY) {
            self.post_event(EventRecord::state_entry());
        }
    }

    fn revoke_grants(&self) {
        let (local_id, item_id) = (self.identity.local_id, self.identity.item_id);
        self.services.world.clear_script_permissions(local_id, item_id);
        self.services.plugins.remove_all_for_instance(local_id, item_id);
    }
}
