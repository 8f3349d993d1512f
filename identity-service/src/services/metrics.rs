//! Domain counters. Exported through the Prometheus recorder installed by
//! `service_core::observability::init_metrics`.

use metrics::counter;

pub fn record_login(outcome: &'static str) {
    counter!("identity_logins_total", "outcome" => outcome).increment(1);
}

pub fn record_registration(outcome: &'static str) {
    counter!("identity_registrations_total", "outcome" => outcome).increment(1);
}

/// `path` is `index` or `scan`.
pub fn record_credential_lookup(path: &'static str) {
    counter!("identity_credential_lookups_total", "path" => path).increment(1);
}

pub fn record_role_request(event: &'static str) {
    counter!("identity_role_requests_total", "event" => event).increment(1);
}

/// `direction` is `granted` or `revoked`.
pub fn record_role_reconciliation(direction: &'static str) {
    counter!("identity_role_reconciliations_total", "direction" => direction).increment(1);
}
