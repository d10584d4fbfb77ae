use tracing::trace;

// Trace-level counters. Enable with RUST_LOG=listing_studio_rs::metrics=trace.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "studio.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn gateway_elapsed(call: &'static str, elapsed_ms: u128, ok: bool) {
    trace!(
        target = "studio.metrics",
        call = call,
        elapsed_ms = elapsed_ms as u64,
        ok = ok,
        "gateway_call_elapsed"
    );
}
