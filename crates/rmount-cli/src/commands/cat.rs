use std::io::Write;

use rmount_remote::Session;

pub async fn run(session: &Session, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = session.remote().open_read(path).await?;
    let mut buf = vec![0u8; session.chunk_size()];
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }
    out.flush()?;
    reader.close().await?;

    Ok(())
}
