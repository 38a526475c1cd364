//! Turns raw transport error text into something a traveller can act on.
//!
//! The classification is a best-effort substring match. It is meant for
//! display only, never branch on its output.

const UNAVAILABLE: &str = "The trip planning service is temporarily \
    unavailable. Please try again in a few minutes.";
const RATE_LIMITED: &str = "I'm getting a lot of requests right now. \
    Please slow down and retry shortly.";
const UNREACHABLE: &str = "I can't reach the server. Please check your \
    internet connection and try again.";
const SERVER_ERROR: &str = "I'm having trouble processing your request \
    right now. Please try again in a moment.";
const GENERIC: &str = "Sorry, something went wrong while planning your \
    trip. Please try again.";

const NETWORK_MARKERS: [&str; 4] =
    ["network", "failed to fetch", "connection", "timed out"];

/// Returns the message shown in place of a failed response.
pub fn user_facing_error(error: &str) -> &'static str {
    if error.contains("503") {
        return UNAVAILABLE;
    }
    if error.contains("429") {
        return RATE_LIMITED;
    }
    let lower = error.to_lowercase();
    if NETWORK_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return UNREACHABLE;
    }
    if error.contains("500") || lower.contains("server") {
        return SERVER_ERROR;
    }
    GENERIC
}
