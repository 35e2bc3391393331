//! One-way frame forwarding

use crate::stream::{StreamReader, StreamWriter};
use crate::Result;
use tokio::io::{AsyncRead, AsyncWrite};

/// Forward frames from `src` to `dst` until `src` hangs up or an error occurs.
///
/// `dst` is flushed whenever `src` has no further complete frame buffered, so
/// bursts go out together and a pause in `src` never holds frames back.
///
/// Failing to deliver a Terminate counts as a clean end: its recipient closes
/// right away, which can surface as a broken pipe on our side.
pub(crate) async fn pump<R, W>(src: &mut StreamReader<R>, dst: &mut StreamWriter<W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = match src.next().await {
            Ok(frame) => frame,
            Err(e) if e.is_clean_close() => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut written = dst.send(&frame).await;
        if written.is_ok() && !src.has_next() {
            written = dst.flush().await;
        }

        match written {
            Ok(()) => {}
            Err(e) if frame.is_terminate() => {
                tracing::debug!(error = %e, "peer closed after Terminate");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}
