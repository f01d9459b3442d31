use super::api::DriveApi;
use super::error::{DriveApiError, UploadError};
use super::limiter::RateLimiter;
use super::types::{PartRequest, UploadSession};
use std::time::Duration;

/// Business code the open platform returns when an app exceeds its
/// request frequency.
pub const THROTTLE_CODE: i64 = 99_991_400;

/// Upload one block, waiting out frequency limits for as long as the
/// server keeps signalling them.
pub async fn transfer_block(
    api: &dyn DriveApi,
    limiter: &RateLimiter,
    session: &UploadSession,
    seq: u32,
    payload: Vec<u8>,
) -> Result<(), UploadError> {
    let request = PartRequest {
        upload_id: session.upload_id().to_string(),
        seq,
        size: payload.len() as u64,
        payload,
    };

    loop {
        limiter.acquire().await;
        match api.upload_part(&request).await {
            Ok(()) => {
                tracing::debug!(seq, size = request.size, "block uploaded");
                return Ok(());
            }
            Err(DriveApiError::Remote {
                code,
                msg,
                rate_limit_reset,
            }) if code == THROTTLE_CODE => {
                let Some(value) = rate_limit_reset else {
                    return Err(UploadError::Transfer { seq, code, msg });
                };
                let wait_secs = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|source| UploadError::Parse {
                        seq,
                        value: value.clone(),
                        source,
                    })?;
                tracing::warn!(seq, wait_secs, "block throttled, retrying after reset");
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
            }
            Err(DriveApiError::Remote { code, msg, .. }) => {
                return Err(UploadError::Transfer { seq, code, msg });
            }
            Err(other) => return Err(UploadError::Api(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::fake::FakeDrive;
    use tokio::time::Instant;

    fn session() -> UploadSession {
        UploadSession::new("U1", 5, 2, 9).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_block_waits_for_reset_then_succeeds() {
        let drive = FakeDrive::new(5).throttle(1, "2");
        let limiter = RateLimiter::per_second(100);
        let start = Instant::now();

        transfer_block(&drive, &limiter, &session(), 1, b"fghi".to_vec())
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
        let parts = drive.part_calls();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.seq == 1 && p.payload == b"fghi" && p.size == 4));
        assert_eq!(drive.stored_blocks(), vec![(1, b"fghi".to_vec())]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_is_unbounded() {
        let drive = FakeDrive::new(5)
            .throttle(0, "1")
            .throttle(0, "1")
            .throttle(0, "1")
            .throttle(0, "1");
        let limiter = RateLimiter::per_second(100);

        transfer_block(&drive, &limiter, &session(), 0, b"abcde".to_vec())
            .await
            .unwrap();
        assert_eq!(drive.part_calls().len(), 5);
    }

    #[tokio::test]
    async fn unparsable_reset_header_is_a_parse_error() {
        let drive = FakeDrive::new(5).throttle(1, "soon");
        let limiter = RateLimiter::per_second(100);

        let err = transfer_block(&drive, &limiter, &session(), 1, b"fghi".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Parse { seq: 1, ref value, .. } if value == "soon"));
        assert_eq!(drive.part_calls().len(), 1);
    }

    #[tokio::test]
    async fn throttle_without_reset_header_is_a_transfer_error() {
        let drive = FakeDrive::new(5).fail(1, THROTTLE_CODE, "frequency limit", None);
        let limiter = RateLimiter::per_second(100);

        let err = transfer_block(&drive, &limiter, &session(), 1, b"fghi".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transfer { seq: 1, code: THROTTLE_CODE, .. }));
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let drive = FakeDrive::new(5).fail(1, 500, "internal error", Some("1"));
        let limiter = RateLimiter::per_second(100);

        let err = transfer_block(&drive, &limiter, &session(), 1, b"fghi".to_vec())
            .await
            .unwrap_err();
        assert!(
            matches!(err, UploadError::Transfer { seq: 1, code: 500, ref msg } if msg == "internal error")
        );
        assert_eq!(drive.part_calls().len(), 1);
    }
}
