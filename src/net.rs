use std::time::Duration;

use ureq::ErrorKind::*;

/// Statuses pip retries on (pip/_internal/network/session.py).
const RETRY_STATUS: &[u16] = &[500, 503, 520, 527];

/// Transport error kinds that look potentially transient.
const RETRY_ERRORKIND: &[ureq::ErrorKind] =
    &[Dns, ConnectionFailed, TooManyRedirects, Io, ProxyConnect];

const SLEEP_TIMES_MS: &[u64] = &[250, 500, 1000, 2000, 4000];

pub fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_read(Duration::from_secs(30))
        .timeout_write(Duration::from_secs(30))
        .build()
}

/// Issue a request, retrying transient failures with backoff. The native
/// ureq result is preserved so callers can still pick apart 4xx statuses.
pub fn call_with_retry(
    req: ureq::Request,
) -> std::result::Result<ureq::Response, ureq::Error> {
    let mut sleeps = SLEEP_TIMES_MS.iter();
    loop {
        let result = req.clone().call();
        match &result {
            Ok(_) => return result,
            Err(ureq::Error::Status(status, _)) => {
                if !RETRY_STATUS.contains(status) {
                    return result;
                }
            }
            Err(err @ ureq::Error::Transport(_)) => {
                if !RETRY_ERRORKIND.contains(&err.kind()) {
                    return result;
                }
            }
        }
        match sleeps.next() {
            Some(ms) => std::thread::sleep(Duration::from_millis(*ms)),
            None => return result,
        }
    }
}
