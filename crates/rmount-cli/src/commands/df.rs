use rmount_remote::Session;

pub async fn run(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    let info = session.remote().stat_fs().await?;

    println!("Capacity:  {} bytes", info.capacity);
    println!("Used:      {} bytes", info.used);
    println!("Remaining: {} bytes", info.remaining);

    Ok(())
}
