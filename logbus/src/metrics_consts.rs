pub const EVENTS_DISPATCHED: &str = "logbus_events_dispatched";
pub const DELIVERY_REPORTS: &str = "logbus_delivery_reports";
pub const DELIVERIES_OUTSTANDING: &str = "logbus_deliveries_outstanding";
pub const REBALANCE_TRANSITIONS: &str = "logbus_rebalance_transitions";
pub const COMMIT_REQUESTS: &str = "logbus_commit_requests";
pub const STALE_COMMIT_ACKS: &str = "logbus_stale_commit_acks";
pub const ADMIN_REQUESTS: &str = "logbus_admin_requests";
pub const ADMIN_DEADLINE_EXPIRED: &str = "logbus_admin_deadline_expired";
pub const ADMIN_RESULTS_DISCARDED: &str = "logbus_admin_results_discarded";
pub const UNMAPPED_ENGINE_EVENTS: &str = "logbus_unmapped_engine_events";
