use biometrics::{Collector, Counter, Moments};

pub(crate) static HANDSHAKE_REQUESTS: Counter = Counter::new("alarmie.handshake.requests");
pub(crate) static HANDSHAKE_ERRORS: Counter = Counter::new("alarmie.handshake.errors");
pub(crate) static HANDSHAKE_REJECTIONS: Counter = Counter::new("alarmie.handshake.rejections");
pub(crate) static HANDSHAKE_DURATION: Moments =
    Moments::new("alarmie.handshake.duration_seconds");

pub(crate) static UPGRADES: Counter = Counter::new("alarmie.upgrade.attempts");
pub(crate) static UPGRADE_ERRORS: Counter = Counter::new("alarmie.upgrade.errors");
pub(crate) static UPGRADE_DURATION: Moments = Moments::new("alarmie.upgrade.duration_seconds");
pub(crate) static ENDPOINT_EXPIRED: Counter = Counter::new("alarmie.upgrade.endpoint_expired");

pub(crate) static CONNECT_RETRIES: Counter = Counter::new("alarmie.connect.retries");
pub(crate) static CONNECT_BACKOFF: Moments = Moments::new("alarmie.connect.backoff_seconds");

pub(crate) static FRAMES_SENT: Counter = Counter::new("alarmie.session.frames_sent");
pub(crate) static FRAMES_RECEIVED: Counter = Counter::new("alarmie.session.frames_received");
pub(crate) static PROTOCOL_ERRORS: Counter = Counter::new("alarmie.session.protocol_errors");
pub(crate) static SESSIONS_CLOSED: Counter = Counter::new("alarmie.session.closed");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&HANDSHAKE_REQUESTS);
    collector.register_counter(&HANDSHAKE_ERRORS);
    collector.register_counter(&HANDSHAKE_REJECTIONS);
    collector.register_moments(&HANDSHAKE_DURATION);

    collector.register_counter(&UPGRADES);
    collector.register_counter(&UPGRADE_ERRORS);
    collector.register_moments(&UPGRADE_DURATION);
    collector.register_counter(&ENDPOINT_EXPIRED);

    collector.register_counter(&CONNECT_RETRIES);
    collector.register_moments(&CONNECT_BACKOFF);

    collector.register_counter(&FRAMES_SENT);
    collector.register_counter(&FRAMES_RECEIVED);
    collector.register_counter(&PROTOCOL_ERRORS);
    collector.register_counter(&SESSIONS_CLOSED);
}
