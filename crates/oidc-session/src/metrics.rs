//! Session metrics
//!
//! - `session_refresh_total` (counter): labels `outcome`, `role`
//! - `session_grant_total` (counter): labels `grant`, `outcome`
//! - `session_state_transitions_total` (counter): label `reason`
//!
//! The host installs whatever recorder it likes; without one these are no-ops.

use crate::refresh::Role;
use crate::session::StateChangeReason;

/// Record one caller's view of a refresh. `outcome` is `success`, `cleared`
/// or `error`.
pub fn record_refresh(outcome: &'static str, role: Role) {
    metrics::counter!("session_refresh_total", "outcome" => outcome, "role" => role.label())
        .increment(1);
}

/// Record a completed grant attempt.
pub fn record_grant(grant: &'static str, outcome: &'static str) {
    metrics::counter!("session_grant_total", "grant" => grant, "outcome" => outcome).increment(1);
}

pub fn record_transition(reason: StateChangeReason) {
    metrics::counter!("session_state_transitions_total", "reason" => reason.label())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_refresh("success", Role::Leader);
        record_grant("anonymous", "success");
        record_transition(StateChangeReason::Logout);
    }

    #[test]
    fn refresh_counter_carries_role() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_refresh("success", Role::Leader);
        record_refresh("success", Role::Joined);
        record_refresh("cleared", Role::Leader);

        let output = handle.render();
        assert!(output.contains("session_refresh_total"), "got: {output}");
        assert!(output.contains("role=\"joined\""), "got: {output}");
        assert!(output.contains("outcome=\"cleared\""), "got: {output}");
    }

    #[test]
    fn grant_and_transition_counters() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_grant("biometric", "error");
        record_transition(StateChangeReason::Invalid);

        let output = handle.render();
        assert!(output.contains("grant=\"biometric\""), "got: {output}");
        assert!(output.contains("session_state_transitions_total"), "got: {output}");
        assert!(output.contains("reason=\"invalid\""), "got: {output}");
    }
}
