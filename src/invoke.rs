//! Isolated invocation of a single feature on a single binary.
//!
//! A feature call can fail in three ways beyond returning an error: it can
//! panic, it can hang, and it can return the wrong kind of output. All three
//! are folded into a [`FeatureError`] here so callers only deal with `Result`.

use crate::error::FeatureError;
use crate::features::{Feature, FeatureOutput};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Timed-out calls of one feature that may still be running before further
/// calls of that feature are refused with [`FeatureError::Suspended`].
pub const MAX_STALLED_CALLS: usize = 4;

/// Shared count of abandoned helper threads that have not finished yet.
///
/// Each of them still holds a reference to the binary it was given, so the
/// count is capped per feature.
#[derive(Debug, Clone, Default)]
pub struct StalledCalls(Arc<AtomicUsize>);

impl StalledCalls {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run `feature` over `data`.
///
/// Without a timeout the call runs on the current thread. With one, it runs on
/// a helper thread; if the limit expires the helper is abandoned and its
/// eventual result discarded.
pub fn invoke(
    feature: &Arc<dyn Feature>,
    data: &Arc<[u8]>,
    timeout: Option<Duration>,
) -> Result<FeatureOutput, FeatureError> {
    invoke_limited(feature, data, timeout, &StalledCalls::default())
}

/// Like [`invoke`], but refuses to start another helper thread while
/// `stalled` already counts [`MAX_STALLED_CALLS`] abandoned ones.
pub fn invoke_limited(
    feature: &Arc<dyn Feature>,
    data: &Arc<[u8]>,
    timeout: Option<Duration>,
    stalled: &StalledCalls,
) -> Result<FeatureOutput, FeatureError> {
    let output = match timeout {
        None => call_catching_panics(feature.as_ref(), data),
        Some(limit) => {
            let running = stalled.count();
            if running >= MAX_STALLED_CALLS {
                warn!(
                    "Not calling {}: {} earlier calls are still running past their timeout",
                    feature.name(),
                    running
                );
                return Err(FeatureError::Suspended { stalled: running });
            }
            call_with_timeout(Arc::clone(feature), Arc::clone(data), limit, stalled)
        }
    }?;
    check_contract(feature.as_ref(), output)
}

fn call_catching_panics(feature: &dyn Feature, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
    panic::catch_unwind(AssertUnwindSafe(|| feature.extract(data)))
        .unwrap_or_else(|payload| Err(FeatureError::Panicked(panic_message(payload.as_ref()))))
}

fn call_with_timeout(
    feature: Arc<dyn Feature>,
    data: Arc<[u8]>,
    limit: Duration,
    stalled: &StalledCalls,
) -> Result<FeatureOutput, FeatureError> {
    let (tx, rx) = bounded(1);
    let thread_name = format!("feature-{}", feature.name());
    // Whichever side flips this second knows the other already did
    let abandoned = Arc::new(AtomicBool::new(false));
    let helper_abandoned = Arc::clone(&abandoned);
    let helper_stalled = stalled.clone();

    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            // The receiver is gone if the caller already gave up on us
            let _ = tx.send(call_catching_panics(feature.as_ref(), &data));
            drop(data);
            if helper_abandoned.swap(true, Ordering::SeqCst) {
                helper_stalled.0.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .map_err(|e| FeatureError::other(format!("failed to spawn feature thread: {}", e)))?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            if !abandoned.swap(true, Ordering::SeqCst) {
                stalled.0.fetch_add(1, Ordering::SeqCst);
            }
            Err(FeatureError::Timeout(limit))
        }
        Err(RecvTimeoutError::Disconnected) => Err(FeatureError::Panicked(
            "feature thread exited without a result".to_string(),
        )),
    }
}

fn check_contract(feature: &dyn Feature, output: FeatureOutput) -> Result<FeatureOutput, FeatureError> {
    match (feature.produces_image(), output.is_image()) {
        (true, false) => Err(FeatureError::contract(
            "declared as image feature but returned scalars",
        )),
        (false, true) => Err(FeatureError::contract(
            "declared as scalar feature but returned an image",
        )),
        _ => {
            // The format becomes a file extension
            if let FeatureOutput::Image(image) = &output {
                let format = &image.format;
                if format.is_empty() || !format.bytes().all(|b| b.is_ascii_alphanumeric()) {
                    return Err(FeatureError::contract(format!(
                        "invalid image format {:?}",
                        format
                    )));
                }
            }
            Ok(output)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{ImagePayload, ScalarMap};
    use std::time::Instant;

    struct Behaves(&'static str);

    impl Feature for Behaves {
        fn name(&self) -> &str {
            self.0
        }

        fn produces_image(&self) -> bool {
            self.0 == "wrong_kind_image"
        }

        fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
            match self.0 {
                "panics" => panic!("boom on {} bytes", data.len()),
                "hangs" => {
                    std::thread::sleep(Duration::from_secs(5));
                    Ok(FeatureOutput::Scalars(ScalarMap::new()))
                }
                "fails" => Err(FeatureError::other("bad input")),
                "wrong_kind_scalar" => Ok(FeatureOutput::Image(ImagePayload {
                    bytes: vec![],
                    format: "png".to_string(),
                })),
                _ => {
                    let mut map = ScalarMap::new();
                    map.insert("len".to_string(), data.len().into());
                    Ok(FeatureOutput::Scalars(map))
                }
            }
        }
    }

    fn feature(name: &'static str) -> Arc<dyn Feature> {
        Arc::new(Behaves(name))
    }

    fn data() -> Arc<[u8]> {
        Arc::from(vec![1u8, 2, 3])
    }

    #[test]
    fn test_success_inline_and_threaded() {
        let ok = feature("ok");
        for timeout in [None, Some(Duration::from_secs(5))] {
            match invoke(&ok, &data(), timeout).unwrap() {
                FeatureOutput::Scalars(map) => assert_eq!(map["len"], 3),
                FeatureOutput::Image(_) => panic!("expected scalars"),
            }
        }
    }

    #[test]
    fn test_error_passes_through() {
        let err = invoke(&feature("fails"), &data(), None).unwrap_err();
        assert_eq!(err, FeatureError::Other("bad input".to_string()));
    }

    #[test]
    fn test_panic_becomes_error() {
        let err = invoke(&feature("panics"), &data(), None).unwrap_err();
        assert_eq!(err, FeatureError::Panicked("boom on 3 bytes".to_string()));

        let err = invoke(&feature("panics"), &data(), Some(Duration::from_secs(5))).unwrap_err();
        assert!(matches!(err, FeatureError::Panicked(_)));
    }

    #[test]
    fn test_hang_becomes_timeout() {
        let start = Instant::now();
        let limit = Duration::from_millis(100);
        let err = invoke(&feature("hangs"), &data(), Some(limit)).unwrap_err();
        assert_eq!(err, FeatureError::Timeout(limit));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    struct Sleeps(u64);

    impl Feature for Sleeps {
        fn name(&self) -> &str {
            "sleeps"
        }

        fn extract(&self, _data: &[u8]) -> Result<FeatureOutput, FeatureError> {
            std::thread::sleep(Duration::from_millis(self.0));
            Ok(FeatureOutput::Scalars(ScalarMap::new()))
        }
    }

    #[test]
    fn test_stalled_calls_suspend_feature() {
        let slow: Arc<dyn Feature> = Arc::new(Sleeps(3_000));
        let stalled = StalledCalls::default();
        let limit = Some(Duration::from_millis(20));

        for _ in 0..MAX_STALLED_CALLS {
            let err = invoke_limited(&slow, &data(), limit, &stalled).unwrap_err();
            assert!(matches!(err, FeatureError::Timeout(_)));
        }
        assert_eq!(stalled.count(), MAX_STALLED_CALLS);

        let err = invoke_limited(&slow, &data(), limit, &stalled).unwrap_err();
        assert_eq!(
            err,
            FeatureError::Suspended {
                stalled: MAX_STALLED_CALLS
            }
        );
        // A refused call spawns nothing
        assert_eq!(stalled.count(), MAX_STALLED_CALLS);
    }

    #[test]
    fn test_finished_helper_releases_its_slot() {
        let slow: Arc<dyn Feature> = Arc::new(Sleeps(200));
        let stalled = StalledCalls::default();

        let err = invoke_limited(&slow, &data(), Some(Duration::from_millis(20)), &stalled).unwrap_err();
        assert!(matches!(err, FeatureError::Timeout(_)));
        assert_eq!(stalled.count(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while stalled.count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(stalled.count(), 0);
    }

    #[test]
    fn test_contract_violations() {
        let err = invoke(&feature("wrong_kind_scalar"), &data(), None).unwrap_err();
        assert!(matches!(err, FeatureError::ContractViolation(_)));

        let err = invoke(&feature("wrong_kind_image"), &data(), None).unwrap_err();
        assert!(matches!(err, FeatureError::ContractViolation(_)));
    }

    struct BadFormat;

    impl Feature for BadFormat {
        fn name(&self) -> &str {
            "bad_format"
        }

        fn produces_image(&self) -> bool {
            true
        }

        fn extract(&self, _data: &[u8]) -> Result<FeatureOutput, FeatureError> {
            Ok(FeatureOutput::Image(ImagePayload {
                bytes: vec![0],
                format: "../png".to_string(),
            }))
        }
    }

    #[test]
    fn test_image_format_must_be_plain_extension() {
        let bad: Arc<dyn Feature> = Arc::new(BadFormat);
        let err = invoke(&bad, &data(), None).unwrap_err();
        assert!(matches!(err, FeatureError::ContractViolation(_)));
    }
}
