use std::path::Path;

use rmount_remote::{Session, WriteBackHandle};
use tokio::io::AsyncReadExt;
use tracing::info;

/// Parse octal permission bits such as `644` or `0o755`.
pub fn parse_mode(mode: &str) -> Result<u32, Box<dyn std::error::Error>> {
    let digits = mode.trim_start_matches("0o");
    let bits = u32::from_str_radix(digits, 8)
        .map_err(|_| format!("invalid mode '{}': expected octal permission bits", mode))?;
    if bits > 0o7777 {
        return Err(format!("invalid mode '{}': out of range", mode).into());
    }
    Ok(bits)
}

/// Stream `local` into `remote` through a write-back handle.
///
/// With `append` the existing remote content is kept and the local file is
/// written after it; otherwise the remote file is replaced.
pub async fn run(
    session: &Session,
    local: &Path,
    remote: &str,
    mode: u32,
    append: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tokio::fs::File::open(local).await?;
    let mut handle = WriteBackHandle::open(session, remote, mode, !append).await?;

    let mut offset = handle.len();
    let mut buf = vec![0u8; session.chunk_size()];
    let result = async {
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            handle.write(&buf[..n], offset).await?;
            offset += n as u64;
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    }
    .await;

    if let Err(e) = result {
        // The remote keeps its previous content.
        handle.discard()?;
        return Err(e);
    }
    handle.close().await?;

    info!("Uploaded {} bytes from {:?} to {}", handle.bytes_written(), local, remote);
    println!("Wrote {} bytes to {}", handle.bytes_written(), remote);

    Ok(())
}
