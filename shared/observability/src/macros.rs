//! Logging macros for the recurring events of the generation pipeline.

/// Log a timed operation (measures and logs duration)
#[macro_export]
macro_rules! log_timed {
    ($name:expr, $block:expr) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(target: "timing", operation = $name, duration_ms = duration_ms, "operation completed");
        result
    }};
}

/// Log an external service call
#[macro_export]
macro_rules! log_external_call {
    ($source:expr, $endpoint:expr) => {
        tracing::debug!(target: "external", source = $source, endpoint = $endpoint, "calling external source");
    };
    ($source:expr, $endpoint:expr, $duration_ms:expr, $status:expr) => {
        tracing::info!(target: "external", source = $source, endpoint = $endpoint, duration_ms = $duration_ms, status = $status, "external call completed");
    };
}

/// Log a cache operation
#[macro_export]
macro_rules! log_cache {
    (hit, $key:expr) => {
        tracing::debug!(target: "cache", operation = "hit", key = $key, "🎯 cache hit");
    };
    (miss, $key:expr) => {
        tracing::debug!(target: "cache", operation = "miss", key = $key, "❌ cache miss");
    };
    (set, $key:expr) => {
        tracing::debug!(target: "cache", operation = "set", key = $key, "💾 cache set");
    };
}

/// Log a pipeline stage transition
#[macro_export]
macro_rules! log_stage {
    ($request_id:expr, $stage:expr) => {
        tracing::debug!(target: "pipeline", request_id = %$request_id, stage = ?$stage, "stage entered");
    };
    ($request_id:expr, $stage:expr, $detail:expr) => {
        tracing::debug!(target: "pipeline", request_id = %$request_id, stage = ?$stage, detail = %$detail, "stage entered");
    };
}

/// Log a retry attempt
#[macro_export]
macro_rules! log_retry {
    ($operation:expr, $attempt:expr, $max_attempts:expr) => {
        tracing::warn!(target: "retry", operation = $operation, attempt = $attempt, max_attempts = $max_attempts, "retrying operation");
    };
    ($operation:expr, $attempt:expr, $max_attempts:expr, $error:expr) => {
        tracing::warn!(target: "retry", operation = $operation, attempt = $attempt, max_attempts = $max_attempts, error = %$error, "retrying after error");
    };
}

/// Log a feature toggle check
#[macro_export]
macro_rules! log_feature {
    ($feature:expr, $enabled:expr) => {
        tracing::debug!(target: "features", feature = $feature, enabled = $enabled, "feature check");
    };
}

#[cfg(test)]
mod tests {
    #[derive(Debug)]
    enum Stage {
        Retrieving,
    }

    #[test]
    fn test_macros_compile() {
        let value = log_timed!("sum", 1 + 2);
        assert_eq!(value, 3);

        log_external_call!("embedding", "/embed");
        log_external_call!("embedding", "/embed", 12u64, 200u16);

        log_cache!(hit, "post:abc");
        log_cache!(miss, "post:def");
        log_cache!(set, "post:def");

        log_stage!("req-1", Stage::Retrieving);
        log_stage!("req-1", Stage::Retrieving, "3 strategies");

        log_retry!("generate_post", 2, 3);
        log_retry!("generate_post", 2, 3, "timeout");

        log_feature!("RemoteGeneration", true);
    }
}
