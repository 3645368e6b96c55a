use tracing::trace;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use crate::config::{DEFAULT_LOG_FILTER, LOGGING_ENABLED};
use crate::peer::ice::CandidateKind;
use crate::peer::types::IceCandidate;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global subscriber when logging is enabled for this build.
/// Returns `false` if logging is disabled or a subscriber was already set.
pub fn init() -> bool {
    if !LOGGING_ENABLED {
        return false;
    }
    init_with(DEFAULT_LOG_FILTER)
}

/// Installs the global subscriber; `RUST_LOG` overrides `default_filter`.
pub fn init_with(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_owned()))
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Traces a trickled ICE candidate
pub fn dump_candidate(label: &str, peer_id: &str, candidate: &IceCandidate) {
    trace!(
        peer_id,
        kind = ?CandidateKind::of(candidate),
        sdp_mid = ?candidate.sdp_mid,
        sdp_mline_index = ?candidate.sdp_mline_index,
        "trickle {label}: {}",
        candidate.candidate
    );
}
