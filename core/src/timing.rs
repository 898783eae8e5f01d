//! Timing helpers for the audit pipeline.
//!
//! Wraps a future and reports how long it took through `tracing`, so that
//! listing fetches and per-repository resolution show up with an
//! `elapsed_ms` field next to the rest of the run's logs.

/// Await a future and log its wall-clock duration.
///
/// Logs at `debug` with fields:
/// - `operation`: the operation label
/// - `elapsed_ms`: elapsed time in milliseconds (u64)
/// - any extra `name = value` pairs passed after the future
///
/// Evaluates to the future's output.
#[macro_export]
macro_rules! measure_time_async {
    ($label:expr, $fut:expr $(, $field:ident = $value:expr)* $(,)?) => {{
        let __start = ::std::time::Instant::now();
        let __result = $fut.await;
        let __elapsed = __start.elapsed();
        ::tracing::debug!(
            operation = $label,
            elapsed_ms = __elapsed.as_millis() as u64,
            $($field = $value,)*
            "operation completed"
        );
        __result
    }};
}
